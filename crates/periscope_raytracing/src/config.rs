//! # Ray Tracing Configuration
//!
//! ```toml
//! auto_instancing = true
//! exclude_decals = false
//!
//! [culling]
//! enabled = true
//! radius = 5000.0
//! angle_threshold_degrees = 1.0
//!
//! [lod]
//! min_items_per_task = 1024
//! max_tasks = 64
//! ```

use periscope_core::TaskGranularity;
use serde::{Deserialize, Serialize};

use crate::error::{RayTracingError, RayTracingResult};

/// Cone culling of static primitives behind the view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceCullingConfig {
    /// Off by default.
    pub enabled: bool,
    /// Primitives closer than this are never culled.
    pub radius: f32,
    /// Primitives whose angular size reaches this are never culled.
    pub angle_threshold_degrees: f32,
}

impl Default for RelevanceCullingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 10_000.0,
            angle_threshold_degrees: 1.0,
        }
    }
}

/// Work partitioning of the LOD resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodResolverConfig {
    /// Lower bound on primitives per task.
    pub min_items_per_task: usize,
    /// Upper bound on the number of tasks.
    pub max_tasks: usize,
}

impl Default for LodResolverConfig {
    fn default() -> Self {
        let granularity = TaskGranularity::default();
        Self {
            min_items_per_task: granularity.min_items_per_task,
            max_tasks: granularity.max_tasks,
        }
    }
}

impl LodResolverConfig {
    /// As a task granularity.
    #[inline]
    #[must_use]
    pub const fn granularity(&self) -> TaskGranularity {
        TaskGranularity {
            min_items_per_task: self.min_items_per_task,
            max_tasks: self.max_tasks,
        }
    }
}

/// Tunables for a [`crate::RayTracingSceneAssembler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayTracingConfig {
    /// Merge primitives with identical geometry and render state.
    pub auto_instancing: bool,
    /// Leave decal primitives out of the scene.
    pub exclude_decals: bool,
    /// Force every static primitive to this LOD.
    pub force_lod: Option<u8>,
    /// Multiplier on the computed screen size.
    pub lod_distance_scale: f32,
    /// Cone culling.
    pub culling: RelevanceCullingConfig,
    /// LOD task partitioning.
    pub lod: LodResolverConfig,
    /// Dynamic primitives gathered per shard.
    pub dynamic_shard_size: usize,
}

impl Default for RayTracingConfig {
    fn default() -> Self {
        Self {
            auto_instancing: true,
            exclude_decals: false,
            force_lod: None,
            lod_distance_scale: 1.0,
            culling: RelevanceCullingConfig::default(),
            lod: LodResolverConfig::default(),
            dynamic_shard_size: 32,
        }
    }
}

impl RayTracingConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`RayTracingError::ConfigParse`] for malformed TOML,
    /// [`RayTracingError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> RayTracingResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RayTracingError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// [`RayTracingError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> RayTracingResult<()> {
        if self.lod_distance_scale.is_nan() || self.lod_distance_scale <= 0.0 {
            return Err(RayTracingError::InvalidConfig(
                "lod_distance_scale must be positive".into(),
            ));
        }
        if self.lod.min_items_per_task == 0 || self.lod.max_tasks == 0 {
            return Err(RayTracingError::InvalidConfig(
                "lod granularity must be at least 1".into(),
            ));
        }
        if self.dynamic_shard_size == 0 {
            return Err(RayTracingError::InvalidConfig(
                "dynamic_shard_size must be at least 1".into(),
            ));
        }
        let culling = &self.culling;
        if culling.radius.is_nan() || culling.radius < 0.0 {
            return Err(RayTracingError::InvalidConfig(
                "culling.radius must not be negative".into(),
            ));
        }
        if !(0.0..180.0).contains(&culling.angle_threshold_degrees) {
            return Err(RayTracingError::InvalidConfig(format!(
                "culling.angle_threshold_degrees {} outside 0..180",
                culling.angle_threshold_degrees
            )));
        }
        Ok(())
    }
}
