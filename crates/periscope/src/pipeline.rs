//! # Frame Pipeline
//!
//! ```text
//! Frame N:
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ 1. OCCLUSION: ALLOCATE + ISSUE                                   │
//! │    └─ batch boxes, flush queries, submit HZB                     │
//! │                                                                  │
//! │ 2. RAY TRACING: ASSEMBLE                                         │
//! │    ├─ relevance, LOD resolve ∥ dynamic gather                    │
//! │    └─ dedup, dispatch geometry updates                           │
//! │                                                                  │
//! │ 3. OCCLUSION: READ + TRIM                                        │
//! │    └─ results of frame N - B, evict stale histories              │
//! │                                                                  │
//! │ 4. RAY TRACING: BUILD                                            │
//! │    └─ forced builds, wait update fence, top-level build          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use std::time::{Duration, Instant};

use periscope_core::{RayonTaskGraph, TaskGraph};
use periscope_occlusion::{
    DynamicVertexBuffer, HzbRhi, OcclusionConfig, OcclusionPrimitive, OcclusionRhi, OcclusionStats, OcclusionView,
    ReflectionQuery, ShadowQuery, VisibilityContext,
};
use periscope_raytracing::{
    AccelerationStructureBuilder, AssemblyStats, BuildReport, DynamicGeometryGatherer,
    GeometryUpdateRhi, RayTracingConfig, RayTracingScene, RayTracingSceneAssembler, RayTracingView,
};

use crate::config::PeriscopeConfig;
use crate::error::PeriscopeResult;

/// Everything the pipeline draws from in one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Occlusion camera.
    pub view: &'a OcclusionView,
    /// Wall-clock time in seconds.
    pub time: f64,
    /// Primitives to occlusion test.
    pub primitives: &'a [OcclusionPrimitive],
    /// Shadows to occlusion test.
    pub shadows: &'a [ShadowQuery],
    /// Planar reflections to occlusion test.
    pub reflections: &'a [ReflectionQuery],
    /// Ray tracing scene.
    pub scene: &'a RayTracingScene,
    /// Views the ray tracing scene is gathered for.
    pub ray_tracing_views: &'a [RayTracingView],
}

/// GPU collaborators for one frame.
pub struct FrameDevices<'a> {
    /// Occlusion queries and their draws.
    pub occlusion: &'a mut dyn OcclusionRhi,
    /// Transient vertex memory for query boxes.
    pub vertex_buffer: &'a mut dyn DynamicVertexBuffer,
    /// HZB test pass.
    pub hzb: &'a mut dyn HzbRhi,
    /// Async-compute geometry updates.
    pub geometry_updates: &'a mut dyn GeometryUpdateRhi,
    /// Acceleration structure builder.
    pub builder: &'a mut dyn AccelerationStructureBuilder,
    /// Dynamic geometry gatherer.
    pub gatherer: &'a dyn DynamicGeometryGatherer,
}

/// Per-stage timings in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTimings {
    /// Allocate and issue.
    pub occlusion_issue_us: u64,
    /// Ray tracing assembly.
    pub assembly_us: u64,
    /// Read and trim.
    pub occlusion_read_us: u64,
    /// Acceleration structure build, including the fence wait.
    pub build_us: u64,
    /// Whole frame.
    pub total_us: u64,
}

/// Outcome of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Occlusion frame number.
    pub frame: u32,
    /// Occlusion counters.
    pub occlusion: OcclusionStats,
    /// Ray tracing assembly counters.
    pub ray_tracing: AssemblyStats,
    /// What the build did.
    pub build: BuildReport,
    /// Stage timings.
    pub timings: FrameTimings,
}

/// Runs occlusion culling and ray tracing assembly for one view.
#[derive(Debug)]
pub struct FramePipeline<G: TaskGraph = RayonTaskGraph> {
    visibility: VisibilityContext,
    assembler: RayTracingSceneAssembler<G>,
    frame_budget: Duration,
    stats: FrameStatsAccumulator,
}

impl<G: TaskGraph> FramePipeline<G> {
    /// Pipeline scheduling ray tracing work on `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if either unit rejects its config.
    pub fn new(config: PeriscopeConfig, graph: G) -> PeriscopeResult<Self> {
        Ok(Self {
            visibility: VisibilityContext::new(config.occlusion)?,
            assembler: RayTracingSceneAssembler::new(config.ray_tracing, graph)?,
            frame_budget: Duration::from_micros(config.frame_budget_us),
            stats: FrameStatsAccumulator::new(),
        })
    }

    /// Occlusion state of the view.
    #[must_use]
    pub fn visibility(&self) -> &VisibilityContext {
        &self.visibility
    }

    /// Ray tracing assembler.
    #[must_use]
    pub fn assembler(&self) -> &RayTracingSceneAssembler<G> {
        &self.assembler
    }

    /// Accumulated timings.
    #[must_use]
    pub fn stats(&self) -> &FrameStatsAccumulator {
        &self.stats
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// Builder failures. Occlusion phase errors cannot happen here since
    /// the phases run in order.
    pub fn run_frame(
        &mut self,
        input: &FrameInput<'_>,
        devices: &mut FrameDevices<'_>,
    ) -> PeriscopeResult<FrameReport> {
        let start = Instant::now();
        let mut timings = FrameTimings::default();

        let mut occlusion = self.visibility.begin_frame(input.view, input.time);
        let frame = occlusion.frame();
        occlusion.allocate_queries(
            devices.occlusion,
            devices.vertex_buffer,
            input.primitives,
            input.shadows,
            input.reflections,
        )?;
        occlusion.issue_queries(devices.occlusion, devices.hzb)?;
        let issued = Instant::now();
        timings.occlusion_issue_us = elapsed_us(start, issued);

        let scene_frame = self.assembler.assemble(
            input.scene,
            input.ray_tracing_views,
            devices.gatherer,
            devices.geometry_updates,
        );
        let ray_tracing = scene_frame.stats;
        let assembled = Instant::now();
        timings.assembly_us = elapsed_us(issued, assembled);

        occlusion.read_previous_results(devices.occlusion)?;
        occlusion.trim()?;
        let read = Instant::now();
        timings.occlusion_read_us = elapsed_us(assembled, read);

        let build = scene_frame.build(devices.builder)?;
        let end = Instant::now();
        timings.build_us = elapsed_us(read, end);
        timings.total_us = elapsed_us(start, end);

        let report = FrameReport {
            frame,
            occlusion: self.visibility.stats(),
            ray_tracing,
            build,
            timings,
        };
        self.stats.record(&report, self.frame_budget);
        if timings.total_us > self.frame_budget.as_micros() as u64 {
            tracing::warn!(
                frame,
                total_us = timings.total_us,
                budget_us = self.frame_budget.as_micros() as u64,
                "frame exceeded budget"
            );
        }
        tracing::debug!(
            frame,
            occluded = report.occlusion.primitives_occluded,
            instances = report.ray_tracing.instances,
            total_us = timings.total_us,
            "frame complete"
        );
        Ok(report)
    }

    /// Swaps the occlusion tunables between frames.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation; the old config stays.
    pub fn set_occlusion_config(&mut self, config: OcclusionConfig) -> PeriscopeResult<()> {
        self.visibility.set_config(config)?;
        Ok(())
    }

    /// Swaps the ray tracing tunables between frames.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation; the old config stays.
    pub fn set_ray_tracing_config(&mut self, config: RayTracingConfig) -> PeriscopeResult<()> {
        self.assembler.set_config(config)?;
        Ok(())
    }

    /// Releases every GPU query held by the view.
    pub fn destroy(&mut self, rhi: &mut dyn OcclusionRhi) {
        self.visibility.destroy(rhi);
    }
}

fn elapsed_us(from: Instant, to: Instant) -> u64 {
    to.duration_since(from).as_micros() as u64
}

/// Running totals over frames.
#[derive(Debug, Clone)]
pub struct FrameStatsAccumulator {
    /// Frames recorded.
    pub frames_recorded: u64,
    /// Sum of frame times.
    pub total_us_sum: u64,
    /// Fastest frame.
    pub min_frame_us: u64,
    /// Slowest frame.
    pub max_frame_us: u64,
    /// Frames over budget.
    pub frames_over_budget: u64,
    /// Sum of occluded primitives.
    pub occluded_sum: u64,
    /// Sum of considered primitives.
    pub considered_sum: u64,
    /// Sum of instance entries.
    pub instances_sum: u64,
    /// Sum of instance transforms.
    pub transforms_sum: u64,
    /// Frames whose update fence was lost.
    pub fences_lost: u64,
}

impl FrameStatsAccumulator {
    /// Empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames_recorded: 0,
            total_us_sum: 0,
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            frames_over_budget: 0,
            occluded_sum: 0,
            considered_sum: 0,
            instances_sum: 0,
            transforms_sum: 0,
            fences_lost: 0,
        }
    }

    /// Adds a frame.
    pub fn record(&mut self, report: &FrameReport, budget: Duration) {
        let total = report.timings.total_us;
        self.frames_recorded += 1;
        self.total_us_sum += total;
        self.min_frame_us = self.min_frame_us.min(total);
        self.max_frame_us = self.max_frame_us.max(total);
        if total > budget.as_micros() as u64 {
            self.frames_over_budget += 1;
        }
        self.occluded_sum += u64::from(report.occlusion.primitives_occluded);
        self.considered_sum += u64::from(report.occlusion.primitives_considered);
        self.instances_sum += u64::from(report.ray_tracing.instances);
        self.transforms_sum += u64::from(report.ray_tracing.transforms);
        self.fences_lost += u64::from(report.build.update_fence_lost);
    }

    /// Average frame time in milliseconds.
    #[must_use]
    pub fn avg_frame_ms(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        (self.total_us_sum as f64 / self.frames_recorded as f64) / 1000.0
    }

    /// Fraction of considered primitives that were occluded.
    #[must_use]
    pub fn occlusion_rate(&self) -> f64 {
        if self.considered_sum == 0 {
            return 0.0;
        }
        self.occluded_sum as f64 / self.considered_sum as f64
    }

    /// Average transforms per instance entry.
    #[must_use]
    pub fn instancing_ratio(&self) -> f64 {
        if self.instances_sum == 0 {
            return 0.0;
        }
        self.transforms_sum as f64 / self.instances_sum as f64
    }
}

impl Default for FrameStatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
