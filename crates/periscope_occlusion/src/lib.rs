//! # Periscope Occlusion
//!
//! Per-view occlusion culling driven by GPU tests whose results arrive
//! several frames late.
//!
//! ## Frame Flow
//!
//! ```text
//! ┌─────────────────┐   ┌──────────────┐   ┌─────────────────────┐   ┌──────┐
//! │ AllocateQueries │──►│ IssueQueries │──►│ ReadPreviousResults │──►│ Trim │
//! └─────────────────┘   └──────────────┘   └─────────────────────┘   └──────┘
//!   decide & batch        flush batches       read frame F - B          every
//!   per primitive         submit HZB          map HZB readback          6th frame
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **All cross-frame state lives in a `VisibilityContext`** - one per view, no globals
//! 2. **A result is only read for the frame it was issued in** - ring index + stored frame
//! 3. **Failures degrade to "visible"** - exhausted pools, lost devices, late queries
//! 4. **Only `HzbOcclusionTester::map_results` blocks** - query reads opt in explicitly

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod batcher;
pub mod config;
pub mod context;
pub mod error;
pub mod headless;
pub mod history;
pub mod hzb;
pub mod orchestrator;
pub mod query_pool;
pub mod rhi;
pub mod stats;

pub use batcher::{BatchedBoxOcclusionTester, BoxVertex, CUBE_INDICES};
pub use config::OcclusionConfig;
pub use context::VisibilityContext;
pub use error::{OcclusionError, OcclusionResult};
pub use headless::{HeadlessGpu, HeadlessGpuConfig, HeadlessStats, VisibilityOracle};
pub use history::{PendingOcclusionTest, PendingTest, PrimitiveOcclusionKey, PrimitiveOcclusionRecord};
pub use hzb::{HzbOcclusionTester, HzbTexel};
pub use orchestrator::{
    OcclusionOrchestrator, OcclusionPhase, OcclusionPrimitive, OcclusionView, ProjectionKind,
    ReflectionKey, ReflectionQuery, ShadowKey, ShadowQuery, ShadowQueryPolicy,
};
pub use query_pool::{FrameQueryPool, QueryHandle, QueryReadback, SlotState};
pub use rhi::{DynamicVertexBuffer, HzbRhi, HzbTestRequest, NativeQuery, OcclusionRhi, VertexAllocation};
pub use stats::OcclusionStats;
