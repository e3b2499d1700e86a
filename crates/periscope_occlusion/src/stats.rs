//! Occlusion statistics.

/// Counters accumulated over one frame of a view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OcclusionStats {
    /// Primitives inspected this frame.
    pub primitives_considered: u32,
    /// Primitives rejected by the frustum.
    pub primitives_frustum_culled: u32,
    /// Primitives visible without a test (near plane, distance, not occludable).
    pub primitives_trivially_visible: u32,
    /// Primitives reported occluded.
    pub primitives_occluded: u32,
    /// Query handles handed out to primitives, shadows and reflections.
    pub queries_issued: u32,
    /// Batches drawn.
    pub batches_flushed: u32,
    /// Bounds added to the HZB test.
    pub hzb_bounds_tested: u32,
    /// Shadow queries issued.
    pub shadow_queries: u32,
    /// Reflection queries issued.
    pub reflection_queries: u32,
    /// Results that came back with a sample count.
    pub cache_hits: u32,
    /// Reads that had to fall back to "visible".
    pub cache_misses: u32,
    /// Reads the backend reported as failed.
    pub read_failures: u32,
    /// Reads whose result was not ready yet.
    pub read_not_ready: u32,
    /// Query allocations that came back null.
    pub allocation_failures: u32,
    /// Histories evicted by trimming.
    pub records_trimmed: u32,
}

impl OcclusionStats {
    /// Fraction of considered primitives that ended up occluded.
    #[must_use]
    pub fn occlusion_rate(&self) -> f32 {
        if self.primitives_considered > 0 {
            self.primitives_occluded as f32 / self.primitives_considered as f32
        } else {
            0.0
        }
    }

    /// Fraction of reads that produced a usable result.
    #[must_use]
    pub fn hit_rate(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total > 0 {
            self.cache_hits as f32 / total as f32
        } else {
            0.0
        }
    }
}
