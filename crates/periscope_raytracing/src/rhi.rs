//! # Ray Tracing RHI
//!
//! GPU collaborators of the assembler: the async-compute queue that
//! updates dynamic geometry, and the acceleration structure builder.
//!
//! ```text
//!  graphics ──begin_async_transition──► PipeTransition
//!                                          │
//!  async compute ◄──dispatch_geometry_updates(transition, ..)──► GpuFuture<()>
//!                                                                   │
//!  RayTracingSceneFrame::build ─────────── wait ────────────────────┘
//! ```

use periscope_core::GpuFuture;

use crate::error::RayTracingResult;
use crate::instance::SceneInstanceEntry;
use crate::scene::{PrimitiveIndex, RayTracingGeometryHandle};

/// Fence pair between the graphics and async-compute pipes. Dispatching
/// geometry updates consumes it, so no update runs without one.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "geometry updates need the transition to be dispatched"]
pub struct PipeTransition {
    id: u64,
}

impl PipeTransition {
    /// Token for the backend's fence pair `id`.
    pub const fn new(id: u64) -> Self {
        Self { id }
    }

    /// Backend fence pair id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Rebuild of a dynamic geometry requested by a gatherer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryUpdateRequest {
    /// Geometry to update.
    pub geometry: RayTracingGeometryHandle,
    /// Primitive that owns it.
    pub primitive: PrimitiveIndex,
}

/// Async-compute queue for dynamic geometry updates.
pub trait GeometryUpdateRhi {
    /// Signals the graphics pipe and opens a transition to async compute.
    fn begin_async_transition(&mut self) -> PipeTransition;

    /// Submits `updates` after `transition`; the future resolves when the
    /// async-compute work has finished.
    fn dispatch_geometry_updates(
        &mut self,
        transition: PipeTransition,
        updates: &[GeometryUpdateRequest],
    ) -> GpuFuture<()>;
}

/// Builds geometry and the top-level structure.
pub trait AccelerationStructureBuilder {
    /// Builds geometry that is still compiling, ahead of the scene build.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn force_build(&mut self, geometry: &[RayTracingGeometryHandle]) -> RayTracingResult<()>;

    /// Builds the top-level structure from the final instance list.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn build_scene(&mut self, instances: &[SceneInstanceEntry]) -> RayTracingResult<()>;
}
