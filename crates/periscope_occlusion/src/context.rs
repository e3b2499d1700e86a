//! # Visibility Context
//!
//! Every piece of occlusion state that outlives a frame, owned by one view.
//! Frames are driven through [`VisibilityContext::begin_frame`], which
//! hands out an [`OcclusionOrchestrator`] borrowing the context.

use std::collections::HashMap;

use periscope_core::MAX_BUFFERED_FRAMES;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::batcher::BatchedBoxOcclusionTester;
use crate::config::OcclusionConfig;
use crate::error::OcclusionResult;
use crate::history::{PrimitiveOcclusionKey, PrimitiveOcclusionRecord};
use crate::hzb::HzbOcclusionTester;
use crate::orchestrator::{OcclusionOrchestrator, OcclusionView, ReflectionKey, ShadowKey, ShadowVolume};
use crate::query_pool::{FrameQueryPool, QueryHandle};
use crate::rhi::OcclusionRhi;
use crate::stats::OcclusionStats;

/// Shadow queries issued in one frame, stored at that frame's ring index.
#[derive(Debug, Default)]
pub(crate) struct ShadowQuerySet {
    pub(crate) frame: Option<u32>,
    pub(crate) queries: HashMap<ShadowKey, QueryHandle>,
}

impl ShadowQuerySet {
    pub(crate) fn release_into(&mut self, pool: &mut FrameQueryPool) {
        for (_, handle) in self.queries.drain() {
            pool.release(handle);
        }
        self.frame = None;
    }
}

/// Cross-frame occlusion state of one view.
#[derive(Debug)]
pub struct VisibilityContext {
    pub(crate) config: OcclusionConfig,
    pub(crate) buffered_frames: u32,
    pub(crate) pool: FrameQueryPool,
    pub(crate) histories: HashMap<PrimitiveOcclusionKey, PrimitiveOcclusionRecord>,
    pub(crate) reflection_histories: HashMap<ReflectionKey, PrimitiveOcclusionRecord>,
    pub(crate) shadow_ring: Vec<ShadowQuerySet>,
    pub(crate) awaiting_shadows: Option<ShadowQuerySet>,
    pub(crate) shadow_draws: Vec<(QueryHandle, ShadowVolume)>,
    pub(crate) grouped: BatchedBoxOcclusionTester,
    pub(crate) individual: BatchedBoxOcclusionTester,
    pub(crate) hzb: HzbOcclusionTester,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) next_frame: u32,
    pub(crate) frame: u32,
    pub(crate) time: f64,
    pub(crate) primitive_resolves: Vec<(PrimitiveOcclusionKey, bool)>,
    pub(crate) reflection_resolves: Vec<(ReflectionKey, bool)>,
    pub(crate) primitive_visibility: HashMap<PrimitiveOcclusionKey, bool>,
    pub(crate) shadow_occlusion: HashMap<ShadowKey, bool>,
    pub(crate) reflection_occlusion: HashMap<ReflectionKey, bool>,
    pub(crate) stats: OcclusionStats,
}

impl VisibilityContext {
    /// Creates the state for a new view.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(config: OcclusionConfig) -> OcclusionResult<Self> {
        config.validate()?;
        let buffered_frames = config.effective_buffered_frames();
        let hzb = HzbOcclusionTester::new(config.hzb_size_x, config.hzb_size_y)?;
        Ok(Self {
            buffered_frames,
            pool: FrameQueryPool::new(buffered_frames),
            histories: HashMap::new(),
            reflection_histories: HashMap::new(),
            shadow_ring: (0..MAX_BUFFERED_FRAMES).map(|_| ShadowQuerySet::default()).collect(),
            awaiting_shadows: None,
            shadow_draws: Vec::new(),
            grouped: BatchedBoxOcclusionTester::new(config.max_boxes_per_batch),
            individual: BatchedBoxOcclusionTester::new(1),
            hzb,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            next_frame: 0,
            frame: 0,
            time: 0.0,
            primitive_resolves: Vec::new(),
            reflection_resolves: Vec::new(),
            primitive_visibility: HashMap::new(),
            shadow_occlusion: HashMap::new(),
            reflection_occlusion: HashMap::new(),
            stats: OcclusionStats::default(),
            config,
        })
    }

    /// Replaces the tunables. A changed buffered frame count is migrated at
    /// the next `allocate_queries`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation; the old config stays.
    pub fn set_config(&mut self, config: OcclusionConfig) -> OcclusionResult<()> {
        config.validate()?;
        if config.hzb_size_x != self.config.hzb_size_x || config.hzb_size_y != self.config.hzb_size_y {
            self.hzb = HzbOcclusionTester::new(config.hzb_size_x, config.hzb_size_y)?;
        }
        if config.max_boxes_per_batch != self.config.max_boxes_per_batch {
            self.grouped.discard(&mut self.pool);
            self.grouped = BatchedBoxOcclusionTester::new(config.max_boxes_per_batch);
        }
        self.config = config;
        Ok(())
    }

    /// Starts frame processing for `view` at wall-clock `time` (seconds).
    pub fn begin_frame(&mut self, view: &OcclusionView, time: f64) -> OcclusionOrchestrator<'_> {
        let frame = self.next_frame;
        self.next_frame = self.next_frame.wrapping_add(1);
        self.frame = frame;
        self.time = time;
        OcclusionOrchestrator::new(self, *view, frame, time)
    }

    /// Visibility of a primitive in the current frame. Unknown keys are visible.
    #[must_use]
    pub fn is_primitive_visible(&self, key: PrimitiveOcclusionKey) -> bool {
        self.primitive_visibility.get(&key).copied().unwrap_or(true)
    }

    /// True when a shadow's query proved it occluded. Unknown keys are not.
    #[must_use]
    pub fn is_shadow_occluded(&self, key: ShadowKey) -> bool {
        self.shadow_occlusion.get(&key).copied().unwrap_or(false)
    }

    /// True when a planar reflection is occluded. Unknown keys are not.
    #[must_use]
    pub fn is_reflection_occluded(&self, key: ReflectionKey) -> bool {
        self.reflection_occlusion.get(&key).copied().unwrap_or(false)
    }

    /// Counters of the current frame.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> OcclusionStats {
        self.stats
    }

    /// Active tunables.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &OcclusionConfig {
        &self.config
    }

    /// Buffered frame count in effect.
    #[inline]
    #[must_use]
    pub const fn buffered_frames(&self) -> u32 {
        self.buffered_frames
    }

    /// Frame number of the most recent `begin_frame`.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u32 {
        self.frame
    }

    /// The query pool, for diagnostics.
    #[inline]
    #[must_use]
    pub const fn query_pool(&self) -> &FrameQueryPool {
        &self.pool
    }

    /// History of a primitive, if it has one.
    #[must_use]
    pub fn history(&self, key: PrimitiveOcclusionKey) -> Option<&PrimitiveOcclusionRecord> {
        self.histories.get(&key)
    }

    /// Number of primitive histories.
    #[must_use]
    pub fn num_histories(&self) -> usize {
        self.histories.len()
    }

    /// Re-slots every ring to a new buffered frame count at `frame`.
    pub(crate) fn migrate_buffered_frames(&mut self, frame: u32, buffered_frames: u32) {
        tracing::debug!(
            from = self.buffered_frames,
            to = buffered_frames,
            frame,
            "occlusion buffered frame count changed"
        );
        let pool = &mut self.pool;
        for record in self
            .histories
            .values_mut()
            .chain(self.reflection_histories.values_mut())
        {
            record.migrate(frame, buffered_frames, |entry| {
                if let Some(handle) = entry.test.query_handle() {
                    pool.release(handle);
                }
            });
        }

        let mut ring: Vec<ShadowQuerySet> =
            (0..MAX_BUFFERED_FRAMES).map(|_| ShadowQuerySet::default()).collect();
        for mut set in self.shadow_ring.drain(..) {
            match set.frame {
                Some(issued) if issued.wrapping_add(buffered_frames) >= frame => {
                    let slot = (issued % buffered_frames) as usize;
                    ring[slot].release_into(pool);
                    ring[slot] = set;
                }
                _ => set.release_into(pool),
            }
        }
        self.shadow_ring = ring;
        self.buffered_frames = buffered_frames;
    }

    /// Releases every query and forgets all history. Call when the view
    /// goes away.
    pub fn destroy(&mut self, rhi: &mut dyn OcclusionRhi) {
        self.grouped.discard(&mut self.pool);
        self.individual.discard(&mut self.pool);
        let pool = &mut self.pool;
        for record in self
            .histories
            .values_mut()
            .chain(self.reflection_histories.values_mut())
        {
            record.release_all(|entry| {
                if let Some(handle) = entry.test.query_handle() {
                    pool.release(handle);
                }
            });
        }
        for set in &mut self.shadow_ring {
            set.release_into(pool);
        }
        if let Some(mut set) = self.awaiting_shadows.take() {
            set.release_into(pool);
        }
        self.shadow_draws.clear();
        self.histories.clear();
        self.reflection_histories.clear();
        self.primitive_resolves.clear();
        self.reflection_resolves.clear();
        self.primitive_visibility.clear();
        self.shadow_occlusion.clear();
        self.reflection_occlusion.clear();
        self.hzb.reset();
        self.pool.release_all(rhi);
        tracing::info!(frame = self.frame, "visibility context destroyed");
    }
}
