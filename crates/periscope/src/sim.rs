//! Deterministic synthetic worlds.
//!
//! A field of props behind and beside a wall. Props share a handful of
//! meshes so auto-instancing has something to merge; a few are animated
//! and go through dynamic gathering. The wall hides everything behind it
//! from a camera at the origin looking down `-Z`.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use periscope_core::BoxSphereBounds;
use periscope_occlusion::{OcclusionPrimitive, VisibilityOracle};
use periscope_raytracing::{
    CachedDrawCommand, PrimitiveFlags, RayTracingGeometryHandle, RayTracingLod, RayTracingScene,
    ScenePrimitive,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Shape of a generated world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldParams {
    /// Random stream seed.
    pub seed: u64,
    /// Props to scatter.
    pub props: u32,
    /// Distinct meshes the props draw from.
    pub meshes: u32,
    /// One prop in this many is animated.
    pub dynamic_every: u32,
    /// Distance of the wall from the camera.
    pub wall_distance: f32,
    /// Half width of the wall.
    pub wall_half_width: f32,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            seed: 7,
            props: 2000,
            meshes: 12,
            dynamic_every: 50,
            wall_distance: 40.0,
            wall_half_width: 60.0,
        }
    }
}

/// Generated inputs for both units.
#[derive(Debug, Clone)]
pub struct SyntheticWorld {
    /// Parameters the world was built from.
    pub params: WorldParams,
    /// Occlusion primitives, one per prop.
    pub primitives: Vec<OcclusionPrimitive>,
    /// Ray tracing scene, one primitive per prop.
    pub scene: RayTracingScene,
}

impl SyntheticWorld {
    /// Builds the world described by `params`.
    #[must_use]
    pub fn generate(params: WorldParams) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut scene = RayTracingScene::new();
        let meshes = params.meshes.max(1);

        let commands: Vec<u32> = (0..meshes)
            .map(|mesh| {
                scene.add_command(CachedDrawCommand {
                    state_hash: 0x51ce_0000 + u64::from(mesh % 4),
                    instance_mask: 0b1,
                    opaque: mesh % 5 != 0,
                    casts_shadow: true,
                    ..CachedDrawCommand::default()
                })
            })
            .collect();

        let mut primitives = Vec::with_capacity(params.props as usize);
        for id in 0..params.props {
            let origin = Vec3::new(
                rng.gen_range(-200.0..200.0),
                rng.gen_range(0.0..4.0),
                rng.gen_range(-400.0..-5.0),
            );
            let extent = Vec3::splat(rng.gen_range(0.5..3.0));
            let bounds = BoxSphereBounds::new(origin, extent);
            let mesh = rng.gen_range(0..meshes);

            let lod = |level: u64, screen_size: f32| RayTracingLod {
                geometry: RayTracingGeometryHandle(u64::from(mesh) * 4 + level + 1),
                draw_commands: vec![Some(commands[mesh as usize])],
                screen_size,
                ..RayTracingLod::default()
            };
            let mut primitive = ScenePrimitive::new(id, bounds, lod(0, 0.2));
            primitive.lods.push(lod(1, 0.05));
            primitive.lods.push(lod(2, 0.0));
            primitive.transform = Mat4::from_translation(origin);
            if params.dynamic_every > 0 && id % params.dynamic_every == 0 {
                primitive.flags = primitive.flags.with(PrimitiveFlags::DYNAMIC);
            }
            scene.add_primitive(primitive);
            primitives.push(OcclusionPrimitive::new(id, bounds));
        }

        tracing::info!(props = params.props, meshes, seed = params.seed, "synthetic world generated");
        Self {
            params,
            primitives,
            scene,
        }
    }

    /// True when the wall hides `bounds` from the origin.
    #[must_use]
    pub fn behind_wall(&self, bounds: &BoxSphereBounds) -> bool {
        hidden_by_wall(&self.params, bounds)
    }

    /// Oracle for the headless GPU: zero samples behind the wall, one per
    /// unit of projected size otherwise.
    #[must_use]
    pub fn oracle(&self) -> VisibilityOracle {
        let params = self.params;
        Arc::new(move |bounds: &BoxSphereBounds| {
            if hidden_by_wall(&params, bounds) {
                0
            } else {
                (bounds.sphere_radius.max(1.0) * 16.0) as u64
            }
        })
    }
}

fn hidden_by_wall(params: &WorldParams, bounds: &BoxSphereBounds) -> bool {
    let near_edge = -bounds.max().z;
    if near_edge <= params.wall_distance {
        return false;
    }
    // Project the box edges onto the wall plane from the origin.
    let scale = params.wall_distance / near_edge;
    bounds.min().x * scale >= -params.wall_half_width && bounds.max().x * scale <= params.wall_half_width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let a = SyntheticWorld::generate(WorldParams::default());
        let b = SyntheticWorld::generate(WorldParams::default());
        assert_eq!(a.primitives, b.primitives);
        assert_eq!(a.scene.len(), 2000);
        let dynamic = a
            .scene
            .primitives
            .iter()
            .filter(|p| p.flags.contains(PrimitiveFlags::DYNAMIC))
            .count();
        assert_eq!(dynamic, 40);
    }

    #[test]
    fn test_wall() {
        let world = SyntheticWorld::generate(WorldParams {
            props: 0,
            ..WorldParams::default()
        });
        let far_center = BoxSphereBounds::new(Vec3::new(0.0, 0.0, -100.0), Vec3::ONE);
        let near_center = BoxSphereBounds::new(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        let far_side = BoxSphereBounds::new(Vec3::new(190.0, 0.0, -100.0), Vec3::ONE);
        assert!(world.behind_wall(&far_center));
        assert!(!world.behind_wall(&near_center));
        assert!(!world.behind_wall(&far_side));
        assert_eq!((world.oracle())(&far_center), 0);
        assert!((world.oracle())(&near_center) > 0);
    }
}
