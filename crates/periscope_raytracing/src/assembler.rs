//! # Ray Tracing Scene Assembler
//!
//! Builds one frame's instance list.
//!
//! ```text
//!             begin_async_transition
//!                      │
//!              relevance filter
//!              ┌───────┴────────┐
//!      dynamic shards      LOD resolver        (forked on the task graph)
//!              └───────┬────────┘
//!                    join
//!                      │
//!              deduplicate static
//!                      │
//!       append dynamic, dispatch updates ──► RayTracingSceneFrame
//! ```

use std::collections::HashSet;

use periscope_core::{FenceError, FrameArena, GpuFuture, RayonTaskGraph, TaskGranularity, TaskGraph};

use crate::config::RayTracingConfig;
use crate::dedup::{DedupStats, InstanceDeduplicator};
use crate::error::RayTracingResult;
use crate::gather::{make_shards, DynamicGeometryGatherer};
use crate::instance::SceneInstanceEntry;
use crate::lod::ParallelLodResolver;
use crate::relevance::{DynamicPrimitive, RayTracingRelevanceFilter, RelevanceStats, RelevantPrimitive};
use crate::rhi::{AccelerationStructureBuilder, GeometryUpdateRhi};
use crate::scene::{RayTracingGeometryHandle, RayTracingScene, RayTracingView};

/// Counters of one assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Relevance filter counters.
    pub relevance: RelevanceStats,
    /// Deduplication counters.
    pub dedup: DedupStats,
    /// Tasks the LOD work was split into.
    pub lod_tasks: u32,
    /// Dynamic shards gathered.
    pub dynamic_shards: u32,
    /// Instances contributed by dynamic gathering.
    pub dynamic_instances: u32,
    /// Geometry updates dispatched.
    pub geometry_updates: u32,
    /// Geometry listed for forced builds.
    pub forced_builds: u32,
    /// Final instance entries.
    pub instances: u32,
    /// Final transforms over all entries.
    pub transforms: u32,
}

/// What [`RayTracingSceneFrame::build`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Entries handed to the builder.
    pub instances: u32,
    /// Geometry force-built first.
    pub forced_builds: u32,
    /// The update fence was abandoned; dynamic geometry may be stale.
    pub update_fence_lost: bool,
}

/// One frame's assembled scene, ready to build.
#[derive(Debug)]
pub struct RayTracingSceneFrame {
    /// Static entries in first-occurrence order, then dynamic entries.
    pub instances: Vec<SceneInstanceEntry>,
    /// Geometry to build before the scene, each listed once.
    pub forced_build: Vec<RayTracingGeometryHandle>,
    /// Resolves when the dynamic geometry updates have run.
    pub update_fence: GpuFuture<()>,
    /// Counters.
    pub stats: AssemblyStats,
}

impl RayTracingSceneFrame {
    /// Force-builds compiling geometry, waits for the geometry updates and
    /// builds the scene.
    ///
    /// A lost update fence is logged and reported; the scene is still built.
    ///
    /// # Errors
    ///
    /// Builder failures, or a fence that was already consumed.
    pub fn build(mut self, builder: &mut dyn AccelerationStructureBuilder) -> RayTracingResult<BuildReport> {
        if !self.forced_build.is_empty() {
            builder.force_build(&self.forced_build)?;
        }

        let update_fence_lost = match self.update_fence.wait() {
            Ok(()) => false,
            Err(FenceError::Abandoned) => {
                tracing::warn!(
                    instances = self.instances.len(),
                    "geometry update fence abandoned, building with stale dynamic geometry"
                );
                true
            }
            Err(err) => return Err(err.into()),
        };

        builder.build_scene(&self.instances)?;
        Ok(BuildReport {
            instances: self.instances.len() as u32,
            forced_builds: self.forced_build.len() as u32,
            update_fence_lost,
        })
    }

    /// Total transforms over all entries.
    #[must_use]
    pub fn num_transforms(&self) -> usize {
        self.instances.iter().map(SceneInstanceEntry::num_transforms).sum()
    }
}

/// Gathers the ray tracing scene every frame. Per-frame storage is kept
/// between frames and reset at the start of each assembly.
#[derive(Debug)]
pub struct RayTracingSceneAssembler<G: TaskGraph = RayonTaskGraph> {
    config: RayTracingConfig,
    graph: G,
    filter: RayTracingRelevanceFilter,
    relevant: FrameArena<RelevantPrimitive>,
    dynamic: Vec<DynamicPrimitive>,
    dedup: InstanceDeduplicator,
    frames: u64,
}

impl<G: TaskGraph> RayTracingSceneAssembler<G> {
    /// Assembler running its parallel work on `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(config: RayTracingConfig, graph: G) -> RayTracingResult<Self> {
        config.validate()?;
        Ok(Self {
            filter: RayTracingRelevanceFilter::new(config.culling),
            config,
            graph,
            relevant: FrameArena::default(),
            dynamic: Vec::new(),
            dedup: InstanceDeduplicator::new(),
            frames: 0,
        })
    }

    /// Replaces the tunables.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation; the old config stays.
    pub fn set_config(&mut self, config: RayTracingConfig) -> RayTracingResult<()> {
        config.validate()?;
        self.filter = RayTracingRelevanceFilter::new(config.culling);
        self.config = config;
        Ok(())
    }

    /// Active tunables.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RayTracingConfig {
        &self.config
    }

    /// Resolved static primitives of the last assembly.
    #[must_use]
    pub fn relevant(&self) -> &[RelevantPrimitive] {
        self.relevant.as_slice()
    }

    /// Assembles the instance list of `scene` for `views`.
    pub fn assemble(
        &mut self,
        scene: &RayTracingScene,
        views: &[RayTracingView],
        gatherer: &dyn DynamicGeometryGatherer,
        update_rhi: &mut dyn GeometryUpdateRhi,
    ) -> RayTracingSceneFrame {
        self.frames += 1;
        self.relevant.reset();
        self.dynamic.clear();

        let transition = update_rhi.begin_async_transition();
        let relevance = self
            .filter
            .filter(scene, views, &mut self.relevant, &mut self.dynamic);

        let resolver = ParallelLodResolver::new(scene, views)
            .with_force_lod(self.config.force_lod)
            .with_lod_distance_scale(self.config.lod_distance_scale)
            .with_exclude_decals(self.config.exclude_decals);
        let granularity = self.config.lod.granularity();
        let mut shards = make_shards(&self.dynamic, self.config.dynamic_shard_size);
        let one_shard_per_task = TaskGranularity {
            min_items_per_task: 1,
            max_tasks: usize::MAX,
        };

        let graph = &self.graph;
        let relevant = self.relevant.as_mut_slice();
        let (lod_tasks, ()) = graph.join(
            || resolver.resolve(graph, relevant, granularity),
            || {
                graph.for_each_range(&mut shards, one_shard_per_task, |_, range| {
                    for shard in range {
                        shard.gather(scene, views, gatherer);
                    }
                });
            },
        );

        let static_output =
            self.dedup
                .deduplicate(scene, self.relevant.as_slice(), self.config.auto_instancing);

        let mut instances = static_output.instances;
        let mut forced_build = static_output.forced_build;
        let mut forced: HashSet<_> = forced_build.iter().copied().collect();
        let mut updates = Vec::new();
        let mut dynamic_instances = 0;
        let dynamic_shards = shards.len();
        for shard in shards {
            let output = shard.output;
            dynamic_instances += output.instances.len();
            instances.extend(output.instances);
            updates.extend(output.geometry_updates);
            forced_build.extend(output.forced_build.into_iter().filter(|g| forced.insert(*g)));
        }

        let update_fence = update_rhi.dispatch_geometry_updates(transition, &updates);

        let stats = AssemblyStats {
            relevance,
            dedup: static_output.stats,
            lod_tasks: lod_tasks as u32,
            dynamic_shards: dynamic_shards as u32,
            dynamic_instances: dynamic_instances as u32,
            geometry_updates: updates.len() as u32,
            forced_builds: forced_build.len() as u32,
            instances: instances.len() as u32,
            transforms: instances.iter().map(SceneInstanceEntry::num_transforms).sum::<usize>() as u32,
        };
        tracing::debug!(
            frame = self.frames,
            views = views.len(),
            instances = stats.instances,
            transforms = stats.transforms,
            merged = stats.dedup.merged,
            dynamic = stats.dynamic_instances,
            forced = stats.forced_builds,
            lod_tasks = stats.lod_tasks,
            workers = self.graph.worker_count(),
            "ray tracing scene assembled"
        );

        RayTracingSceneFrame {
            instances,
            forced_build,
            update_fence,
            stats,
        }
    }
}
