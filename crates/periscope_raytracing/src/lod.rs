//! # Parallel LOD Resolver
//!
//! Fills in every [`RelevantPrimitive`] of the frame: LOD choice, geometry,
//! aggregated command flags and the structural hash used for instancing.
//!
//! ```text
//! relevant: [ 0 ......................................... N )
//!            │  task 0  │  task 1  │ ... │  task k  │
//!            max(min_items_per_task, ceil(N / max_tasks)) items each
//!                         └──── join ────┘
//! ```
//!
//! ## Rules
//!
//! - A task writes only the slots of its own range
//! - Reads of the scene and views are shared and immutable
//! - The caller's join is the only barrier before deduplication

use std::hash::Hasher;

use periscope_core::{TaskGranularity, TaskGraph};
use siphasher::sip::SipHasher13;

use crate::relevance::RelevantPrimitive;
use crate::scene::{
    GeometryBuildState, RayTracingScene, RayTracingView, ScenePrimitive, RAY_TRACING_MASK_SHADOW,
};

/// Bits of the structural hash kept in the instancing key.
pub const STRUCTURAL_HASH_BITS: u32 = 40;

const STRUCTURAL_HASH_MASK: u64 = (1 << STRUCTURAL_HASH_BITS) - 1;

/// Resolves LODs for one frame.
#[derive(Debug, Clone, Copy)]
pub struct ParallelLodResolver<'a> {
    scene: &'a RayTracingScene,
    views: &'a [RayTracingView],
    force_lod: Option<u8>,
    lod_distance_scale: f32,
    exclude_decals: bool,
}

impl<'a> ParallelLodResolver<'a> {
    /// Resolver over `scene` for `views`.
    #[must_use]
    pub fn new(scene: &'a RayTracingScene, views: &'a [RayTracingView]) -> Self {
        Self {
            scene,
            views,
            force_lod: None,
            lod_distance_scale: 1.0,
            exclude_decals: false,
        }
    }

    /// Global LOD override; a view's own override wins.
    #[must_use]
    pub const fn with_force_lod(mut self, force_lod: Option<u8>) -> Self {
        self.force_lod = force_lod;
        self
    }

    /// Multiplier on the computed screen size.
    #[must_use]
    pub const fn with_lod_distance_scale(mut self, scale: f32) -> Self {
        self.lod_distance_scale = scale;
        self
    }

    /// Marks decal primitives as excluded.
    #[must_use]
    pub const fn with_exclude_decals(mut self, exclude: bool) -> Self {
        self.exclude_decals = exclude;
        self
    }

    /// Resolves every entry of `relevant` on `graph` and returns the number
    /// of tasks the work was split into.
    pub fn resolve<G: TaskGraph>(
        &self,
        graph: &G,
        relevant: &mut [RelevantPrimitive],
        granularity: TaskGranularity,
    ) -> usize {
        if relevant.is_empty() {
            return 0;
        }
        let tasks = graph.for_each_range(relevant, granularity, |_, range| {
            for entry in range {
                self.resolve_one(entry);
            }
        });
        tracing::trace!(primitives = relevant.len(), tasks, "ray tracing LODs resolved");
        tasks
    }

    /// Resolves one entry in place.
    pub fn resolve_one(&self, entry: &mut RelevantPrimitive) {
        let Some(primitive) = self.scene.primitive(entry.primitive) else {
            return;
        };
        let Some(view) = self.views.get(entry.view) else {
            return;
        };
        let Some(lod_index) = self.select_lod(primitive, view) else {
            return;
        };
        let lod = &primitive.lods[lod_index];
        entry.lod = Some(lod_index);
        entry.geometry = lod.geometry;
        entry.needs_forced_build = lod.build_state == GeometryBuildState::Compiling;

        let mut hasher = SipHasher13::new();
        hasher.write_u64(lod.geometry.0);

        let mut opaque = true;
        for command in lod
            .draw_commands
            .iter()
            .flatten()
            .filter_map(|&index| self.scene.command(index))
        {
            entry.num_commands += 1;
            entry.key_mask |= command.instance_mask;
            if !command.filtered {
                entry.instance_mask |= command.instance_mask;
            }
            opaque &= command.opaque;
            entry.casts_shadow |= command.casts_shadow;
            entry.decal |= command.decal;
            entry.two_sided |= command.two_sided;
            hasher.write_u64(command.state_hash);
        }
        entry.opaque = opaque && entry.num_commands > 0;

        if entry.casts_shadow {
            entry.key_mask |= RAY_TRACING_MASK_SHADOW;
            if entry.instance_mask != 0 {
                entry.instance_mask |= RAY_TRACING_MASK_SHADOW;
            }
        }
        entry.excluded = self.exclude_decals && entry.decal;
        entry.structural_hash = hasher.finish() & STRUCTURAL_HASH_MASK;
    }

    /// LOD for `primitive` seen from `view`, clamped to resident LODs.
    #[must_use]
    pub fn select_lod(&self, primitive: &ScenePrimitive, view: &RayTracingView) -> Option<usize> {
        let last = primitive.lods.len().checked_sub(1)?;
        let min_lod = usize::from(primitive.min_lod).min(last);

        if let Some(forced) = view.force_lod.or(self.force_lod) {
            return Some(usize::from(forced).clamp(min_lod, last));
        }

        let size = self.screen_size(primitive, view);
        let chosen = primitive
            .lods
            .iter()
            .position(|lod| size >= lod.screen_size)
            .unwrap_or(last);
        Some(chosen.max(min_lod))
    }

    /// Projected diameter of the bounding sphere as a fraction of the
    /// screen, scaled by the view and global LOD scales.
    #[must_use]
    pub fn screen_size(&self, primitive: &ScenePrimitive, view: &RayTracingView) -> f32 {
        let distance = primitive.bounds.origin.distance(view.origin).max(1.0);
        2.0 * view.screen_multiple * primitive.bounds.sphere_radius / distance
            * view.lod_scale
            * self.lod_distance_scale
    }
}
