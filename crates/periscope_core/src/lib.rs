//! # Periscope Core
//!
//! Foundations shared by the occlusion and ray tracing crates:
//! - Bounds, planes and frustums (`math`)
//! - Per-frame index arenas and fixed-capacity pools (`memory`)
//! - GPU fence futures with an explicit `poll()` / `wait()` contract (`sync`)
//! - A task graph abstraction with a single join barrier (`task`)
//!
//! ## Architecture Rules
//!
//! 1. **Per-frame data lives in arenas** - addressed by typed indices, rebuilt every frame
//! 2. **Blocking is visible in the types** - only `GpuFuture::wait` may stall
//! 3. **No panics on degraded paths** - failures are values the caller checks

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod math;
pub mod memory;
pub mod sync;
pub mod task;

pub use error::{CoreError, CoreResult, FenceError, RhiError};
pub use math::{BoxSphereBounds, Frustum, Plane};
pub use memory::{FrameArena, PoolHandle, SlotPool};
pub use sync::{gpu_fence, FenceStatus, GpuFuture, GpuPromise};
pub use task::{InlineTaskGraph, RayonTaskGraph, TaskGraph, TaskGranularity};

/// Maximum number of frames an occlusion result may lag behind submission.
pub const MAX_BUFFERED_FRAMES: u32 = 4;
