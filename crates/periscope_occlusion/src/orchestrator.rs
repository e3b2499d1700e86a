//! # Occlusion Orchestrator
//!
//! Drives one frame of one view through its four phases:
//!
//! ```text
//! AllocateQueries ─► IssueQueries ─► ReadPreviousResults ─► Trim ─► Done
//! ```
//!
//! The answer for frame F comes from the test issued at F - B, where B is
//! the buffered frame count. Tests allocated this frame are read B frames
//! from now. Calling a phase out of order is an error, not a panic.

use std::collections::HashMap;
use std::hash::Hash;

use glam::Vec3;
use periscope_core::{BoxSphereBounds, Frustum};
use rand::Rng;

use crate::config::OcclusionConfig;
use crate::context::{ShadowQuerySet, VisibilityContext};
use crate::error::{OcclusionError, OcclusionResult};
use crate::history::{PendingOcclusionTest, PendingTest, PrimitiveOcclusionKey, PrimitiveOcclusionRecord};
use crate::hzb::HzbOcclusionTester;
use crate::query_pool::{FrameQueryPool, QueryHandle, QueryReadback};
use crate::rhi::{DynamicVertexBuffer, HzbRhi, OcclusionRhi};
use crate::stats::OcclusionStats;

/// Steps of a view's frame, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcclusionPhase {
    /// Decide which objects need a test and allocate it.
    AllocateQueries,
    /// Draw batches and shadow/reflection volumes, submit the HZB test.
    IssueQueries,
    /// Read the tests issued B frames ago.
    ReadPreviousResults,
    /// Drop stale histories.
    Trim,
    /// The frame is finished.
    Done,
}

impl OcclusionPhase {
    const fn next(self) -> Self {
        match self {
            Self::AllocateQueries => Self::IssueQueries,
            Self::IssueQueries => Self::ReadPreviousResults,
            Self::ReadPreviousResults => Self::Trim,
            Self::Trim | Self::Done => Self::Done,
        }
    }
}

/// Camera projection model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionKind {
    /// Perspective projection.
    #[default]
    Perspective,
    /// Orthographic projection.
    Orthographic,
}

/// What the orchestrator needs to know about the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionView {
    /// Camera position.
    pub origin: Vec3,
    /// View frustum, planes facing inward.
    pub frustum: Frustum,
    /// Near clip distance.
    pub near_clip_distance: f32,
    /// Projection model.
    pub projection: ProjectionKind,
    /// Pixels covered by the view.
    pub viewport_pixels: u64,
    /// Treat everything as visible this frame (camera cut); histories are kept.
    pub ignore_existing_queries: bool,
}

impl OcclusionView {
    /// A perspective view looking from `origin` along `forward`.
    #[must_use]
    pub fn perspective(
        origin: Vec3,
        forward: Vec3,
        fov_y_radians: f32,
        viewport: (u32, u32),
        near: f32,
        far: f32,
    ) -> Self {
        let aspect = viewport.0.max(1) as f32 / viewport.1.max(1) as f32;
        Self {
            origin,
            frustum: Frustum::perspective(origin, forward, Vec3::Y, fov_y_radians, aspect, near, far),
            near_clip_distance: near,
            projection: ProjectionKind::Perspective,
            viewport_pixels: u64::from(viewport.0) * u64::from(viewport.1),
            ignore_existing_queries: false,
        }
    }

    fn intersects_near_plane(&self, bounds: &BoxSphereBounds) -> bool {
        let near = self.frustum.near_plane();
        match self.projection {
            ProjectionKind::Perspective => !near.box_fully_inside(bounds.origin, bounds.box_extent),
            ProjectionKind::Orthographic => near.distance(bounds.origin) <= bounds.sphere_radius,
        }
    }
}

/// A primitive submitted for occlusion testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionPrimitive {
    /// History key.
    pub key: PrimitiveOcclusionKey,
    /// World bounds.
    pub bounds: BoxSphereBounds,
    /// False for primitives that must never be culled by occlusion.
    pub can_be_occluded: bool,
    /// Allows grouped queries and skipped re-queries.
    pub allow_approximate_occlusion: bool,
}

impl OcclusionPrimitive {
    /// An occludable primitive allowing approximate occlusion.
    #[must_use]
    pub fn new(primitive: u32, bounds: BoxSphereBounds) -> Self {
        Self {
            key: PrimitiveOcclusionKey::new(primitive),
            bounds,
            can_be_occluded: true,
            allow_approximate_occlusion: true,
        }
    }
}

/// Identifies a shadow: the casting light and the shadowed primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowKey {
    /// Light id.
    pub light: u32,
    /// Primitive id.
    pub primitive: u32,
}

/// How a shadow's visibility is tested and when a test is pointless.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowQueryPolicy {
    /// Test the shadow bounds box; skipped when it crosses the near plane.
    BoundingBox,
    /// Test the light's influence sphere; skipped when the camera is inside.
    LightInfluenceSphere {
        /// Sphere center.
        center: Vec3,
        /// Sphere radius.
        radius: f32,
    },
    /// Test the shadow bounds box; skipped when the camera's near plane
    /// reaches into the receiver frustum.
    NearPlaneVsFrustum {
        /// Frustum of the shadow receivers.
        receiver_frustum: Frustum,
    },
}

/// A shadow submitted for occlusion testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowQuery {
    /// Shadow key.
    pub key: ShadowKey,
    /// Bounds of the shadow volume.
    pub bounds: BoxSphereBounds,
    /// Test policy.
    pub policy: ShadowQueryPolicy,
}

/// Identifies a planar reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReflectionKey(pub u32);

/// A planar reflection submitted for occlusion testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionQuery {
    /// Reflection key.
    pub key: ReflectionKey,
    /// Bounds of the reflecting surface.
    pub bounds: BoxSphereBounds,
}

/// Volume drawn inside a shadow query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ShadowVolume {
    Box { center: Vec3, extent: Vec3 },
    Sphere { center: Vec3, radius: f32 },
}

/// What a read told us about an object.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Observation {
    /// The test produced a result.
    Measured {
        occluded: bool,
        definite: bool,
        pixel_fraction: f32,
    },
    /// A test existed but its result cannot be trusted.
    Unknown,
    /// No test was issued for this frame.
    Missing,
}

/// Reads pending tests for one frame.
struct ResultReader<'a> {
    pool: &'a mut FrameQueryPool,
    rhi: &'a mut dyn OcclusionRhi,
    hzb: &'a HzbOcclusionTester,
    stats: &'a mut OcclusionStats,
    target: Option<u32>,
    wait: bool,
    viewport_pixels: u64,
    max_fraction: f32,
}

impl ResultReader<'_> {
    fn read(&mut self, entry: Option<PendingOcclusionTest>) -> Observation {
        let Some(entry) = entry else {
            return Observation::Missing;
        };
        let observation = if Some(entry.frame) == self.target {
            self.read_test(entry)
        } else {
            self.stats.cache_misses += 1;
            Observation::Unknown
        };
        if let Some(handle) = entry.test.query_handle() {
            self.pool.release(handle);
        }
        observation
    }

    fn read_test(&mut self, entry: PendingOcclusionTest) -> Observation {
        match entry.test {
            PendingTest::Query { handle, grouped } => {
                match self.pool.read_result(self.rhi, handle, self.wait) {
                    QueryReadback::Samples(samples) => {
                        self.stats.cache_hits += 1;
                        let occluded = samples == 0;
                        let pixel_fraction = if occluded {
                            0.0
                        } else if grouped {
                            self.max_fraction
                        } else {
                            samples as f32 / self.viewport_pixels.max(1) as f32
                        };
                        Observation::Measured {
                            occluded,
                            definite: !grouped,
                            pixel_fraction,
                        }
                    }
                    QueryReadback::NotReady => {
                        self.stats.read_not_ready += 1;
                        self.stats.cache_misses += 1;
                        Observation::Unknown
                    }
                    QueryReadback::Failed => {
                        self.stats.read_failures += 1;
                        self.stats.cache_misses += 1;
                        Observation::Unknown
                    }
                }
            }
            PendingTest::Hzb { index } => {
                if self.hzb.is_valid_frame(entry.frame) {
                    self.stats.cache_hits += 1;
                    let occluded = !self.hzb.is_visible(index);
                    Observation::Measured {
                        occluded,
                        definite: true,
                        pixel_fraction: if occluded { 0.0 } else { self.max_fraction },
                    }
                } else {
                    self.stats.cache_misses += 1;
                    Observation::Unknown
                }
            }
        }
    }
}

/// Folds an observation into a history and returns the visibility answer.
fn apply_observation(
    record: &mut PrimitiveOcclusionRecord,
    observation: Observation,
    continuous: bool,
    frame: u32,
    time: f64,
    max_fraction: f32,
) -> bool {
    let (occluded, definite) = match observation {
        Observation::Measured {
            occluded,
            definite,
            pixel_fraction,
        } => {
            record.last_pixel_fraction = pixel_fraction;
            (occluded, definite)
        }
        Observation::Unknown => (false, false),
        Observation::Missing if record.is_new_in(frame) || !continuous => (false, false),
        Observation::Missing => {
            let occluded = record.was_occluded_last_frame;
            record.last_pixel_fraction = if occluded { 0.0 } else { max_fraction };
            (occluded, record.occlusion_state_was_definite_last_frame)
        }
    };
    record.was_occluded_last_frame = occluded;
    record.occlusion_state_was_definite_last_frame = definite;
    if !occluded && definite {
        record.last_proven_visible_time = time;
    }
    !occluded
}

fn release_entry(pool: &mut FrameQueryPool, entry: Option<PendingOcclusionTest>) {
    if let Some(handle) = entry.and_then(|e| e.test.query_handle()) {
        pool.release(handle);
    }
}

/// Looks up or creates a history and enters `frame`, releasing whatever
/// the ring hands back unread. Returns whether the object was also
/// considered in the previous frame, and how many frames passed since it
/// was last considered (zero for a new history).
fn enter_record<'m, K: Eq + Hash + Copy>(
    map: &'m mut HashMap<K, PrimitiveOcclusionRecord>,
    pool: &mut FrameQueryPool,
    key: K,
    history_key: PrimitiveOcclusionKey,
    frame: u32,
    buffered_frames: u32,
    time: f64,
) -> (&'m mut PrimitiveOcclusionRecord, bool, u32) {
    let record = map
        .entry(key)
        .or_insert_with(|| PrimitiveOcclusionRecord::new(history_key, frame, time));
    let frames_unconsidered = frame.wrapping_sub(record.last_considered_frame);
    let continuous = !record.is_new_in(frame) && frames_unconsidered == 1;
    let unread = record.begin_frame(frame, buffered_frames);
    release_entry(pool, unread);
    record.last_considered_time = time;
    (record, continuous, frames_unconsidered)
}

/// Drops histories not considered for `min_history_time` (or stamped in
/// the future) and the queries of those idle for `min_query_time`.
fn trim_histories<K>(
    map: &mut HashMap<K, PrimitiveOcclusionRecord>,
    pool: &mut FrameQueryPool,
    config: &OcclusionConfig,
    time: f64,
) -> u32 {
    let min_history_time = time - config.min_history_time;
    let min_query_time = time - config.min_query_time;
    let mut trimmed = 0;
    map.retain(|_, record| {
        let considered = record.last_considered_time;
        let evict = considered < min_history_time || considered > time;
        if evict || considered < min_query_time {
            record.release_all(|entry| {
                if let Some(handle) = entry.test.query_handle() {
                    pool.release(handle);
                }
            });
        }
        if evict {
            trimmed += 1;
        }
        !evict
    });
    trimmed
}

/// Runs one frame of a [`VisibilityContext`].
#[derive(Debug)]
pub struct OcclusionOrchestrator<'a> {
    ctx: &'a mut VisibilityContext,
    view: OcclusionView,
    frame: u32,
    time: f64,
    phase: OcclusionPhase,
}

impl<'a> OcclusionOrchestrator<'a> {
    pub(crate) fn new(ctx: &'a mut VisibilityContext, view: OcclusionView, frame: u32, time: f64) -> Self {
        Self {
            ctx,
            view,
            frame,
            time,
            phase: OcclusionPhase::AllocateQueries,
        }
    }

    /// Phase the frame is in.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> OcclusionPhase {
        self.phase
    }

    /// Frame number being processed.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u32 {
        self.frame
    }

    /// The context this frame runs on.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &VisibilityContext {
        self.ctx
    }

    fn enter(&self, requested: OcclusionPhase) -> OcclusionResult<()> {
        if self.phase == requested {
            Ok(())
        } else {
            Err(OcclusionError::PhaseOrder {
                current: self.phase,
                requested,
            })
        }
    }

    /// Decides which primitives, shadows and reflections need a test and
    /// allocates it.
    ///
    /// # Errors
    ///
    /// [`OcclusionError::PhaseOrder`] unless this is the first phase.
    pub fn allocate_queries(
        &mut self,
        rhi: &mut dyn OcclusionRhi,
        vertex_buffer: &mut dyn DynamicVertexBuffer,
        primitives: &[OcclusionPrimitive],
        shadows: &[ShadowQuery],
        reflections: &[ReflectionQuery],
    ) -> OcclusionResult<()> {
        self.enter(OcclusionPhase::AllocateQueries)?;
        let frame = self.frame;

        let buffered_frames = self.ctx.config.effective_buffered_frames();
        if buffered_frames != self.ctx.buffered_frames {
            self.ctx.migrate_buffered_frames(frame, buffered_frames);
        }
        if !self.ctx.grouped.is_empty() || !self.ctx.individual.is_empty() {
            tracing::warn!(frame, "occlusion batches from an unfinished frame discarded");
            self.ctx.grouped.discard(&mut self.ctx.pool);
            self.ctx.individual.discard(&mut self.ctx.pool);
        }
        self.ctx.pool.advance_frame(frame, buffered_frames);
        vertex_buffer.begin_frame();

        self.ctx.stats = OcclusionStats::default();
        self.ctx.shadow_draws.clear();
        self.ctx.primitive_resolves.clear();
        self.ctx.reflection_resolves.clear();
        self.ctx.primitive_visibility.clear();
        self.ctx.shadow_occlusion.clear();
        self.ctx.reflection_occlusion.clear();

        for primitive in primitives {
            self.allocate_primitive(rhi, vertex_buffer, primitive);
        }
        self.allocate_shadows(rhi, shadows);
        for reflection in reflections {
            self.allocate_reflection(rhi, vertex_buffer, reflection);
        }

        let stats = self.ctx.stats;
        tracing::debug!(
            frame,
            considered = stats.primitives_considered,
            frustum_culled = stats.primitives_frustum_culled,
            trivially_visible = stats.primitives_trivially_visible,
            queries = stats.queries_issued,
            "occlusion queries allocated"
        );
        self.phase = self.phase.next();
        Ok(())
    }

    fn allocate_primitive(
        &mut self,
        rhi: &mut dyn OcclusionRhi,
        vertex_buffer: &mut dyn DynamicVertexBuffer,
        primitive: &OcclusionPrimitive,
    ) {
        let (frame, time, view) = (self.frame, self.time, self.view);
        let buffered_frames = self.ctx.buffered_frames;
        let ctx = &mut *self.ctx;
        let config = &ctx.config;
        let key = primitive.key;
        ctx.stats.primitives_considered += 1;

        if !view.frustum.intersect_bounds(&primitive.bounds) {
            ctx.stats.primitives_frustum_culled += 1;
            ctx.primitive_visibility.insert(key, false);
            return;
        }

        let (record, continuous, frames_unconsidered) = enter_record(
            &mut ctx.histories,
            &mut ctx.pool,
            key,
            key,
            frame,
            buffered_frames,
            time,
        );

        let mut bounds = primitive.bounds;
        if primitive.can_be_occluded && config.newly_tested_expansion_active() {
            if record.expansion_cooldown == 0
                && frames_unconsidered > config.frames_not_tested_to_expand
            {
                record.expansion_cooldown = config.frames_to_expand_newly_tested;
            }
            if record.expansion_cooldown > 0 {
                record.expansion_cooldown -= 1;
                bounds = bounds.expand_by(config.expand_newly_tested_bounds);
            }
        }
        let bounds = bounds.expand_by(config.expand_all_tested_bounds);

        let never_test = config.never_occlusion_test_distance;
        let trivially_visible = !primitive.can_be_occluded
            || bounds.distance_squared_to(view.origin) < never_test * never_test
            || view.intersects_near_plane(&bounds)
            || bounds.sphere_radius >= config.huge_bounds_radius;
        if trivially_visible {
            release_entry(&mut ctx.pool, record.take_awaiting());
            record.was_occluded_last_frame = false;
            record.occlusion_state_was_definite_last_frame = true;
            record.last_proven_visible_time = time;
            ctx.stats.primitives_trivially_visible += 1;
            ctx.primitive_visibility.insert(key, true);
            return;
        }

        let approximate = primitive.allow_approximate_occlusion;
        let test = if config.use_hzb {
            match ctx.hzb.add_bounds(bounds.origin, bounds.box_extent) {
                Some(index) => {
                    ctx.stats.hzb_bounds_tested += 1;
                    Some(PendingTest::Hzb { index })
                }
                // Texture full: recorded as a null query, counted below.
                None => Some(PendingTest::Query {
                    handle: QueryHandle::NULL,
                    grouped: false,
                }),
            }
        } else if approximate && record.was_occluded_last_frame {
            let handle = ctx
                .grouped
                .batch_primitive(&bounds, &mut ctx.pool, rhi, vertex_buffer);
            Some(PendingTest::Query { handle, grouped: true })
        } else {
            let requery = if approximate && record.occlusion_state_was_definite_last_frame {
                let max_fraction = config.max_occlusion_pixels_fraction;
                let multiplier = (record.last_pixel_fraction / max_fraction).max(1.0);
                multiplier * ctx.rng.gen::<f32>() < max_fraction
            } else {
                true
            };
            requery.then(|| {
                let handle = ctx
                    .individual
                    .batch_primitive(&bounds, &mut ctx.pool, rhi, vertex_buffer);
                PendingTest::Query { handle, grouped: false }
            })
        };

        if let Some(test) = test {
            if let PendingTest::Query { handle, .. } = test {
                if handle.is_null() {
                    ctx.stats.allocation_failures += 1;
                } else {
                    ctx.stats.queries_issued += 1;
                }
            }
            let displaced = record.store(frame, buffered_frames, test);
            release_entry(&mut ctx.pool, displaced);
        }
        ctx.primitive_resolves.push((key, continuous));
    }

    fn allocate_shadows(&mut self, rhi: &mut dyn OcclusionRhi, shadows: &[ShadowQuery]) {
        let (frame, view) = (self.frame, self.view);
        let ctx = &mut *self.ctx;
        let slot = (frame % ctx.buffered_frames) as usize;

        if let Some(mut unread) = ctx.awaiting_shadows.take() {
            unread.release_into(&mut ctx.pool);
        }
        ctx.awaiting_shadows = Some(std::mem::take(&mut ctx.shadow_ring[slot]));

        let near = view.near_clip_distance;
        let near_plane = view.frustum.near_plane();
        let mut issued = ShadowQuerySet {
            frame: Some(frame),
            queries: HashMap::with_capacity(shadows.len()),
        };
        for shadow in shadows {
            let bounds = shadow.bounds;
            let (skip, volume) = match shadow.policy {
                ShadowQueryPolicy::BoundingBox => (
                    !near_plane.box_fully_inside(bounds.origin, bounds.box_extent),
                    ShadowVolume::Box {
                        center: bounds.origin,
                        extent: bounds.box_extent,
                    },
                ),
                ShadowQueryPolicy::LightInfluenceSphere { center, radius } => {
                    let reach = radius * 1.05 + near * 2.0;
                    (
                        view.origin.distance_squared(center) < reach * reach,
                        ShadowVolume::Sphere { center, radius },
                    )
                }
                ShadowQueryPolicy::NearPlaneVsFrustum { receiver_frustum } => (
                    receiver_frustum.intersect_sphere(view.origin, near * 3.0_f32.sqrt()),
                    ShadowVolume::Box {
                        center: bounds.origin,
                        extent: bounds.box_extent,
                    },
                ),
            };
            if skip {
                continue;
            }

            let handle = ctx.pool.allocate_query(rhi);
            if handle.is_null() {
                ctx.stats.allocation_failures += 1;
                continue;
            }
            ctx.stats.shadow_queries += 1;
            ctx.stats.queries_issued += 1;
            if let Some(previous) = issued.queries.insert(shadow.key, handle) {
                ctx.pool.release(previous);
            }
            ctx.shadow_draws.push((handle, volume));
        }
        ctx.shadow_ring[slot] = issued;
    }

    fn allocate_reflection(
        &mut self,
        rhi: &mut dyn OcclusionRhi,
        vertex_buffer: &mut dyn DynamicVertexBuffer,
        reflection: &ReflectionQuery,
    ) {
        let (frame, time, view) = (self.frame, self.time, self.view);
        let buffered_frames = self.ctx.buffered_frames;
        let ctx = &mut *self.ctx;
        let key = reflection.key;

        let (record, continuous, _) = enter_record(
            &mut ctx.reflection_histories,
            &mut ctx.pool,
            key,
            PrimitiveOcclusionKey::new(key.0),
            frame,
            buffered_frames,
            time,
        );

        let decided = if !view.frustum.intersect_bounds(&reflection.bounds) {
            Some(true)
        } else if view.intersects_near_plane(&reflection.bounds) {
            Some(false)
        } else {
            None
        };
        if let Some(occluded) = decided {
            release_entry(&mut ctx.pool, record.take_awaiting());
            record.was_occluded_last_frame = occluded;
            record.occlusion_state_was_definite_last_frame = true;
            ctx.reflection_occlusion.insert(key, occluded);
            return;
        }

        let handle = ctx
            .individual
            .batch_primitive(&reflection.bounds, &mut ctx.pool, rhi, vertex_buffer);
        if handle.is_null() {
            ctx.stats.allocation_failures += 1;
        } else {
            ctx.stats.reflection_queries += 1;
            ctx.stats.queries_issued += 1;
        }
        let displaced = record.store(frame, buffered_frames, PendingTest::Query { handle, grouped: false });
        release_entry(&mut ctx.pool, displaced);
        ctx.reflection_resolves.push((key, continuous));
    }

    /// Draws every batch and shadow volume inside its query bracket and
    /// submits the HZB test.
    ///
    /// # Errors
    ///
    /// [`OcclusionError::PhaseOrder`] unless queries were allocated.
    pub fn issue_queries(
        &mut self,
        rhi: &mut dyn OcclusionRhi,
        hzb_rhi: &mut dyn HzbRhi,
    ) -> OcclusionResult<()> {
        self.enter(OcclusionPhase::IssueQueries)?;
        let ctx = &mut *self.ctx;

        let grouped = ctx.grouped.flush(&mut ctx.pool, rhi);
        let individual = ctx.individual.flush(&mut ctx.pool, rhi);
        ctx.stats.batches_flushed += grouped + individual;

        for (handle, volume) in ctx.shadow_draws.drain(..) {
            let Some(native) = ctx.pool.native(handle) else {
                continue;
            };
            rhi.begin_query(native);
            match volume {
                ShadowVolume::Box { center, extent } => rhi.draw_box(center, extent),
                ShadowVolume::Sphere { center, radius } => rhi.draw_sphere(center, radius),
            }
            rhi.end_query(native);
        }

        ctx.hzb.submit(hzb_rhi, self.frame);
        tracing::trace!(frame = self.frame, grouped, individual, "occlusion queries issued");
        self.phase = self.phase.next();
        Ok(())
    }

    /// Reads the tests issued B frames ago and answers visibility for this
    /// frame. Only blocks when `blocking_reads` is configured, or on the
    /// HZB readback fence.
    ///
    /// # Errors
    ///
    /// [`OcclusionError::PhaseOrder`] unless queries were issued.
    pub fn read_previous_results(&mut self, rhi: &mut dyn OcclusionRhi) -> OcclusionResult<()> {
        self.enter(OcclusionPhase::ReadPreviousResults)?;
        let (frame, time) = (self.frame, self.time);
        let ignore = self.view.ignore_existing_queries;
        let ctx = &mut *self.ctx;
        let target = frame.checked_sub(ctx.buffered_frames);
        let max_fraction = ctx.config.max_occlusion_pixels_fraction;

        if let Some(target) = target {
            if ctx.hzb.pending_readbacks() > 0 {
                ctx.hzb.map_results_through(target);
            }
        }

        let mut reader = ResultReader {
            pool: &mut ctx.pool,
            rhi,
            hzb: &ctx.hzb,
            stats: &mut ctx.stats,
            target,
            wait: ctx.config.blocking_reads,
            viewport_pixels: self.view.viewport_pixels,
            max_fraction,
        };

        for &(key, continuous) in &ctx.primitive_resolves {
            let Some(record) = ctx.histories.get_mut(&key) else {
                continue;
            };
            let observation = reader.read(record.take_awaiting());
            let visible = ignore
                || apply_observation(record, observation, continuous, frame, time, max_fraction);
            if !visible {
                reader.stats.primitives_occluded += 1;
            }
            ctx.primitive_visibility.insert(key, visible);
        }

        for &(key, continuous) in &ctx.reflection_resolves {
            let Some(record) = ctx.reflection_histories.get_mut(&key) else {
                continue;
            };
            let observation = reader.read(record.take_awaiting());
            let visible = ignore
                || apply_observation(record, observation, continuous, frame, time, max_fraction);
            ctx.reflection_occlusion.insert(key, !visible);
        }

        if let Some(set) = ctx.awaiting_shadows.take() {
            let readable = set.frame.is_some() && set.frame == target;
            for (key, handle) in set.queries {
                if readable && !ignore {
                    match reader.pool.read_result(reader.rhi, handle, reader.wait) {
                        QueryReadback::Samples(samples) => {
                            reader.stats.cache_hits += 1;
                            ctx.shadow_occlusion.insert(key, samples == 0);
                        }
                        QueryReadback::NotReady => {
                            reader.stats.read_not_ready += 1;
                            reader.stats.cache_misses += 1;
                        }
                        QueryReadback::Failed => {
                            reader.stats.read_failures += 1;
                            reader.stats.cache_misses += 1;
                        }
                    }
                }
                reader.pool.release(handle);
            }
        }

        ctx.hzb.unmap_results();
        let stats = ctx.stats;
        tracing::debug!(
            frame,
            occluded = stats.primitives_occluded,
            hits = stats.cache_hits,
            misses = stats.cache_misses,
            "occlusion results read"
        );
        self.phase = self.phase.next();
        Ok(())
    }

    /// Every `trim_interval_frames` frames, releases idle queries and
    /// evicts stale histories.
    ///
    /// # Errors
    ///
    /// [`OcclusionError::PhaseOrder`] unless results were read.
    pub fn trim(&mut self) -> OcclusionResult<()> {
        self.enter(OcclusionPhase::Trim)?;
        let ctx = &mut *self.ctx;
        if self.frame % ctx.config.trim_interval_frames == 0 {
            let trimmed = trim_histories(&mut ctx.histories, &mut ctx.pool, &ctx.config, self.time)
                + trim_histories(&mut ctx.reflection_histories, &mut ctx.pool, &ctx.config, self.time);
            ctx.stats.records_trimmed += trimmed;
            if trimmed > 0 {
                tracing::debug!(frame = self.frame, trimmed, "occlusion histories trimmed");
            }
        }
        self.phase = self.phase.next();
        Ok(())
    }
}
