//! # Occlusion Configuration
//!
//! Loaded once from TOML; every field has a default so partial files work.
//!
//! ```toml
//! buffered_frames = 2
//! use_hzb = false
//! never_occlusion_test_distance = 0.0
//! ```

use periscope_core::MAX_BUFFERED_FRAMES;
use serde::{Deserialize, Serialize};

use crate::error::{OcclusionError, OcclusionResult};

/// Tunables for a [`crate::VisibilityContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    /// Frames a query result lags behind its submission.
    pub buffered_frames: u32,
    /// Extra latency added by the platform (e.g. multi-GPU alternate frames).
    pub extra_latency_frames: u32,
    /// Boxes per grouped query batch.
    pub max_boxes_per_batch: u32,
    /// Use the HZB test instead of occlusion queries for primitives.
    pub use_hzb: bool,
    /// HZB bounds texture width (multiple of 8).
    pub hzb_size_x: u32,
    /// HZB bounds texture height (multiple of 8).
    pub hzb_size_y: u32,
    /// Primitives closer than this to the camera are never tested.
    pub never_occlusion_test_distance: f32,
    /// Primitives whose bounding sphere reaches this radius are never tested.
    pub huge_bounds_radius: f32,
    /// Added to every tested box.
    pub expand_all_tested_bounds: f32,
    /// Added on top for primitives that were not tested for a while.
    pub expand_newly_tested_bounds: f32,
    /// Frames without being considered after which a primitive counts as
    /// newly tested.
    pub frames_not_tested_to_expand: u32,
    /// How many frames the extra expansion stays active.
    pub frames_to_expand_newly_tested: u32,
    /// Screen fraction above which visible primitives are rarely re-queried.
    pub max_occlusion_pixels_fraction: f32,
    /// Seconds without consideration after which a history drops its queries.
    pub min_query_time: f64,
    /// Seconds without consideration after which a history is evicted.
    pub min_history_time: f64,
    /// Frames between trim passes.
    pub trim_interval_frames: u32,
    /// Stall on query reads instead of treating late results as unknown.
    pub blocking_reads: bool,
    /// Seed for the re-query random stream.
    pub rng_seed: u64,
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            buffered_frames: 1,
            extra_latency_frames: 0,
            max_boxes_per_batch: 16,
            use_hzb: false,
            hzb_size_x: 256,
            hzb_size_y: 256,
            never_occlusion_test_distance: 0.0,
            huge_bounds_radius: 1.0e7,
            expand_all_tested_bounds: 0.0,
            expand_newly_tested_bounds: 0.0,
            frames_not_tested_to_expand: 5,
            frames_to_expand_newly_tested: 2,
            max_occlusion_pixels_fraction: 0.1,
            min_query_time: 0.5,
            min_history_time: 8.0,
            trim_interval_frames: 6,
            blocking_reads: false,
            rng_seed: 0x5eed_0cc1,
        }
    }
}

impl OcclusionConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`OcclusionError::ConfigParse`] for malformed TOML,
    /// [`OcclusionError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> OcclusionResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| OcclusionError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// [`OcclusionError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> OcclusionResult<()> {
        if self.buffered_frames == 0 {
            return Err(OcclusionError::InvalidConfig(
                "buffered_frames must be at least 1".into(),
            ));
        }
        if self.max_boxes_per_batch == 0 || self.max_boxes_per_batch > 8191 {
            return Err(OcclusionError::InvalidConfig(format!(
                "max_boxes_per_batch {} outside 1..=8191",
                self.max_boxes_per_batch
            )));
        }
        for (name, size) in [("hzb_size_x", self.hzb_size_x), ("hzb_size_y", self.hzb_size_y)] {
            if size == 0 || size % 8 != 0 {
                return Err(OcclusionError::InvalidConfig(format!(
                    "{name} {size} must be a non-zero multiple of 8"
                )));
            }
        }
        if self.trim_interval_frames == 0 {
            return Err(OcclusionError::InvalidConfig(
                "trim_interval_frames must be at least 1".into(),
            ));
        }
        if self.max_occlusion_pixels_fraction.is_nan() || self.max_occlusion_pixels_fraction <= 0.0 {
            return Err(OcclusionError::InvalidConfig(
                "max_occlusion_pixels_fraction must be positive".into(),
            ));
        }
        if self.min_history_time < self.min_query_time {
            return Err(OcclusionError::InvalidConfig(
                "min_history_time must not be below min_query_time".into(),
            ));
        }
        Ok(())
    }

    /// Buffered frame count actually used: configured plus platform
    /// latency, clamped to `1..=MAX_BUFFERED_FRAMES`.
    #[must_use]
    pub fn effective_buffered_frames(&self) -> u32 {
        self.buffered_frames
            .saturating_add(self.extra_latency_frames)
            .clamp(1, MAX_BUFFERED_FRAMES)
    }

    /// True when the bounds expansion for newly tested primitives is active.
    #[must_use]
    pub fn newly_tested_expansion_active(&self) -> bool {
        self.expand_newly_tested_bounds > 0.0
            && self.frames_to_expand_newly_tested > 0
            && self.frames_not_tested_to_expand > 0
    }
}
