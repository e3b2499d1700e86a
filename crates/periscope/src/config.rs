//! # Pipeline Configuration
//!
//! One TOML file with a table per unit:
//!
//! ```toml
//! frame_budget_us = 16666
//!
//! [occlusion]
//! buffered_frames = 2
//!
//! [ray_tracing]
//! auto_instancing = true
//! ```

use std::path::Path;

use periscope_occlusion::OcclusionConfig;
use periscope_raytracing::RayTracingConfig;
use serde::{Deserialize, Serialize};

use crate::error::{PeriscopeError, PeriscopeResult};

/// Tunables of a [`crate::FramePipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriscopeConfig {
    /// Frames slower than this are counted and logged.
    pub frame_budget_us: u64,
    /// Occlusion tunables.
    pub occlusion: OcclusionConfig,
    /// Ray tracing tunables.
    pub ray_tracing: RayTracingConfig,
}

impl Default for PeriscopeConfig {
    fn default() -> Self {
        Self {
            frame_budget_us: 16_666,
            occlusion: OcclusionConfig::default(),
            ray_tracing: RayTracingConfig::default(),
        }
    }
}

impl PeriscopeConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`PeriscopeError::ConfigParse`] for malformed TOML, the unit's own
    /// error for out-of-range values.
    pub fn from_toml_str(text: &str) -> PeriscopeResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| PeriscopeError::ConfigParse(e.to_string()))?;
        config.occlusion.validate()?;
        config.ray_tracing.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// I/O failures and everything [`Self::from_toml_str`] rejects.
    pub fn load(path: impl AsRef<Path>) -> PeriscopeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_tables() {
        let config = PeriscopeConfig::from_toml_str(
            r"
            [occlusion]
            buffered_frames = 3

            [ray_tracing]
            exclude_decals = true
            ",
        )
        .unwrap();
        assert_eq!(config.occlusion.buffered_frames, 3);
        assert!(config.ray_tracing.exclude_decals);
        assert_eq!(config.frame_budget_us, 16_666);
    }

    #[test]
    fn test_unit_validation_errors_surface() {
        assert!(matches!(
            PeriscopeConfig::from_toml_str("[occlusion]\nbuffered_frames = 0"),
            Err(PeriscopeError::Occlusion(_))
        ));
        assert!(matches!(
            PeriscopeConfig::from_toml_str("[ray_tracing]\nlod_distance_scale = -1.0"),
            Err(PeriscopeError::RayTracing(_))
        ));
        assert!(matches!(
            PeriscopeConfig::from_toml_str("[occlusion"),
            Err(PeriscopeError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            PeriscopeConfig::load("/nonexistent/periscope.toml"),
            Err(PeriscopeError::Io(_))
        ));
    }
}
