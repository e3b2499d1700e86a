//! # PERISCOPE
//!
//! Visibility and ray tracing scene preparation for one renderer view.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          FramePipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────┐        ┌──────────────────────────┐  │
//! │  │  periscope_occlusion   │        │  periscope_raytracing    │  │
//! │  │  • query pool          │        │  • relevance filter      │  │
//! │  │  • box batching / HZB  │        │  • parallel LOD resolve  │  │
//! │  │  • lagged histories    │        │  • auto-instancing       │  │
//! │  └───────────┬────────────┘        └────────────┬─────────────┘  │
//! │              └──────────► periscope_core ◄───────┘               │
//! │                 bounds, arenas, fences, task graph               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: one TOML file for both units
//! - `pipeline`: frame orchestration and timing
//! - `sim`: deterministic synthetic worlds for the simulator and tests

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod sim;

pub use periscope_core as core;
pub use periscope_occlusion as occlusion;
pub use periscope_raytracing as raytracing;

pub use config::PeriscopeConfig;
pub use error::{PeriscopeError, PeriscopeResult};
pub use pipeline::{FrameDevices, FrameInput, FramePipeline, FrameReport, FrameStatsAccumulator, FrameTimings};
pub use sim::{SyntheticWorld, WorldParams};
