//! # Headless Ray Tracing Backend
//!
//! CPU stand-in for the async-compute queue and the acceleration structure
//! builder. Geometry updates complete immediately unless the backend was
//! created with [`HeadlessRayTracingBackend::deferred`], in which case
//! [`HeadlessRayTracingBackend::complete_updates`] signals them.
//!
//! Clones share one device.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::{gpu_fence, GpuFuture, GpuPromise};

use crate::error::{RayTracingError, RayTracingResult};
use crate::gather::{DynamicGatherOutput, DynamicGeometryGatherer};
use crate::instance::{InstanceDescriptor, InstanceFlags, SceneInstanceEntry};
use crate::rhi::{AccelerationStructureBuilder, GeometryUpdateRequest, GeometryUpdateRhi, PipeTransition};
use crate::scene::{
    GeometryBuildState, PrimitiveIndex, RayTracingGeometryHandle, RayTracingView, ScenePrimitive,
};

/// Work counters of the simulated device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessRayTracingStats {
    /// Transitions opened.
    pub transitions: u64,
    /// Update dispatches.
    pub dispatches: u64,
    /// Geometry updates run.
    pub geometry_updates: u64,
    /// Dispatches whose transition was not the open one.
    pub mismatched_transitions: u64,
    /// Geometry force-built.
    pub forced_builds: u64,
    /// Scene builds.
    pub scene_builds: u64,
}

#[derive(Debug, Default)]
struct BackendState {
    deferred: bool,
    next_transition: u64,
    open_transition: Option<u64>,
    pending: Vec<GpuPromise<()>>,
    built_geometry: Vec<RayTracingGeometryHandle>,
    descriptors: Vec<InstanceDescriptor>,
    lost: bool,
    stats: HeadlessRayTracingStats,
}

/// CPU-simulated ray tracing device.
#[derive(Debug, Clone, Default)]
pub struct HeadlessRayTracingBackend {
    state: Arc<Mutex<BackendState>>,
}

impl HeadlessRayTracingBackend {
    /// Backend whose updates complete on dispatch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose updates wait for [`Self::complete_updates`].
    #[must_use]
    pub fn deferred() -> Self {
        let backend = Self::default();
        backend.state.lock().deferred = true;
        backend
    }

    /// Signals every pending update fence. Returns how many were signalled.
    pub fn complete_updates(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock().pending);
        let count = pending.len();
        for promise in pending {
            promise.signal(());
        }
        count
    }

    /// Drops pending fences unsignalled and fails later work.
    pub fn lose_device(&self) {
        let mut state = self.state.lock();
        state.lost = true;
        state.pending.clear();
        tracing::warn!("headless ray tracing device lost");
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> HeadlessRayTracingStats {
        self.state.lock().stats
    }

    /// Geometry force-built so far, in build order.
    #[must_use]
    pub fn built_geometry(&self) -> Vec<RayTracingGeometryHandle> {
        self.state.lock().built_geometry.clone()
    }

    /// Instance descriptors of the last scene build.
    #[must_use]
    pub fn last_descriptors(&self) -> Vec<InstanceDescriptor> {
        self.state.lock().descriptors.clone()
    }
}

impl GeometryUpdateRhi for HeadlessRayTracingBackend {
    fn begin_async_transition(&mut self) -> PipeTransition {
        let mut state = self.state.lock();
        state.next_transition += 1;
        let id = state.next_transition;
        state.open_transition = Some(id);
        state.stats.transitions += 1;
        PipeTransition::new(id)
    }

    fn dispatch_geometry_updates(
        &mut self,
        transition: PipeTransition,
        updates: &[GeometryUpdateRequest],
    ) -> GpuFuture<()> {
        let mut state = self.state.lock();
        if state.open_transition.take() != Some(transition.id()) {
            state.stats.mismatched_transitions += 1;
            tracing::warn!(transition = transition.id(), "geometry updates dispatched on a stale transition");
        }
        state.stats.dispatches += 1;

        let (promise, future) = gpu_fence();
        if state.lost {
            drop(promise);
            return future;
        }
        state.stats.geometry_updates += updates.len() as u64;
        if state.deferred {
            state.pending.push(promise);
        } else {
            promise.signal(());
        }
        future
    }
}

impl AccelerationStructureBuilder for HeadlessRayTracingBackend {
    fn force_build(&mut self, geometry: &[RayTracingGeometryHandle]) -> RayTracingResult<()> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RayTracingError::BuildFailed("device lost".into()));
        }
        state.stats.forced_builds += geometry.len() as u64;
        state.built_geometry.extend_from_slice(geometry);
        Ok(())
    }

    fn build_scene(&mut self, instances: &[SceneInstanceEntry]) -> RayTracingResult<()> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RayTracingError::BuildFailed("device lost".into()));
        }
        state.descriptors.clear();
        for entry in instances {
            entry.write_descriptors(&mut state.descriptors);
        }
        state.stats.scene_builds += 1;
        Ok(())
    }
}

/// Gatherer that places each dynamic primitive's first LOD at its transform
/// and requests an update of that geometry every frame.
#[derive(Debug, Clone, Copy)]
pub struct HeadlessDynamicGatherer {
    /// Mask given to every gathered instance.
    pub instance_mask: u8,
}

impl Default for HeadlessDynamicGatherer {
    fn default() -> Self {
        Self { instance_mask: 0xff }
    }
}

impl DynamicGeometryGatherer for HeadlessDynamicGatherer {
    fn gather(
        &self,
        primitive: &ScenePrimitive,
        index: PrimitiveIndex,
        _view: &RayTracingView,
        out: &mut DynamicGatherOutput,
    ) {
        let Some(lod) = primitive.lods.first() else {
            return;
        };
        if !lod.geometry.is_valid() {
            return;
        }
        if lod.build_state == GeometryBuildState::Compiling {
            out.force_build(lod.geometry);
        }
        out.request_update(lod.geometry, index);
        out.add_instance(
            lod.geometry,
            primitive.transform,
            primitive.user_index,
            index,
            self.instance_mask,
            InstanceFlags::default(),
        );
    }
}
