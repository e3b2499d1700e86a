//! Dynamic geometry gathering.
//!
//! Dynamic primitives are split into shards of
//! `RayTracingConfig::dynamic_shard_size`; each shard is gathered by one
//! task into its own output, and the outputs are merged in shard order.

use glam::Mat4;

use crate::instance::{InstanceFlags, SceneInstanceEntry};
use crate::relevance::DynamicPrimitive;
use crate::rhi::GeometryUpdateRequest;
use crate::scene::{PrimitiveIndex, RayTracingGeometryHandle, RayTracingScene, RayTracingView, ScenePrimitive};

/// Produces per-frame instances for primitives with dynamic geometry.
pub trait DynamicGeometryGatherer: Sync {
    /// Gathers `primitive` (scene index `index`) for `view` into `out`.
    fn gather(
        &self,
        primitive: &ScenePrimitive,
        index: PrimitiveIndex,
        view: &RayTracingView,
        out: &mut DynamicGatherOutput,
    );
}

/// Gatherer for scenes without dynamic primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDynamicGeometry;

impl DynamicGeometryGatherer for NoDynamicGeometry {
    fn gather(&self, _: &ScenePrimitive, _: PrimitiveIndex, _: &RayTracingView, _: &mut DynamicGatherOutput) {}
}

/// What a gatherer produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicGatherOutput {
    /// Instances, added to the scene without deduplication.
    pub instances: Vec<SceneInstanceEntry>,
    /// Geometry to rebuild on async compute.
    pub geometry_updates: Vec<GeometryUpdateRequest>,
    /// Geometry to build before the scene.
    pub forced_build: Vec<RayTracingGeometryHandle>,
}

impl DynamicGatherOutput {
    /// Adds a single-occurrence instance.
    pub fn add_instance(
        &mut self,
        geometry: RayTracingGeometryHandle,
        transform: Mat4,
        user_index: u32,
        primitive: PrimitiveIndex,
        instance_mask: u8,
        flags: InstanceFlags,
    ) {
        self.instances.push(SceneInstanceEntry::new(
            geometry,
            transform,
            user_index,
            primitive,
            instance_mask,
            flags,
        ));
    }

    /// Requests an async-compute rebuild of `geometry`.
    pub fn request_update(&mut self, geometry: RayTracingGeometryHandle, primitive: PrimitiveIndex) {
        self.geometry_updates.push(GeometryUpdateRequest { geometry, primitive });
    }

    /// Lists `geometry` for a forced build.
    pub fn force_build(&mut self, geometry: RayTracingGeometryHandle) {
        self.forced_build.push(geometry);
    }
}

/// One shard of dynamic work with its private output.
#[derive(Debug, Clone, Default)]
pub struct DynamicGatherShard {
    work: Vec<DynamicPrimitive>,
    /// Output of this shard.
    pub output: DynamicGatherOutput,
}

impl DynamicGatherShard {
    /// Shard over `work`.
    #[must_use]
    pub fn new(work: Vec<DynamicPrimitive>) -> Self {
        Self {
            work,
            output: DynamicGatherOutput::default(),
        }
    }

    /// Primitives in this shard.
    #[must_use]
    pub fn work(&self) -> &[DynamicPrimitive] {
        &self.work
    }

    /// Runs `gatherer` over every primitive of the shard.
    pub fn gather(
        &mut self,
        scene: &RayTracingScene,
        views: &[RayTracingView],
        gatherer: &dyn DynamicGeometryGatherer,
    ) {
        for item in &self.work {
            let (Some(primitive), Some(view)) = (scene.primitive(item.primitive), views.get(item.view)) else {
                continue;
            };
            gatherer.gather(primitive, item.primitive, view, &mut self.output);
        }
    }
}

/// Splits `dynamic` into shards of at most `shard_size` primitives.
#[must_use]
pub fn make_shards(dynamic: &[DynamicPrimitive], shard_size: usize) -> Vec<DynamicGatherShard> {
    dynamic
        .chunks(shard_size.max(1))
        .map(|chunk| DynamicGatherShard::new(chunk.to_vec()))
        .collect()
}
