//! # LOD Resolution Benchmark
//!
//! Resolves 100k static primitives with three LODs each, inline vs on the
//! rayon task graph.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;
use periscope_core::{BoxSphereBounds, FrameArena, InlineTaskGraph, RayonTaskGraph, TaskGranularity};
use periscope_raytracing::{
    CachedDrawCommand, ParallelLodResolver, RayTracingGeometryHandle, RayTracingLod, RayTracingScene,
    RayTracingView, RelevantPrimitive, ScenePrimitive,
};

const PRIMITIVE_COUNT: u32 = 100_000;

fn build_scene() -> RayTracingScene {
    let mut scene = RayTracingScene::new();
    let commands: Vec<u32> = (0..8)
        .map(|i| {
            scene.add_command(CachedDrawCommand {
                state_hash: 0x9e37_79b9 * (u64::from(i) + 1),
                instance_mask: 1 << (i % 4),
                opaque: i % 3 != 0,
                casts_shadow: true,
                ..CachedDrawCommand::default()
            })
        })
        .collect();

    for i in 0..PRIMITIVE_COUNT {
        let origin = Vec3::new((i % 317) as f32 * 8.0, (i % 23) as f32, (i / 317) as f32 * 8.0);
        let segments = vec![Some(commands[(i % 8) as usize]), Some(commands[((i + 3) % 8) as usize])];
        let lod = |geometry: u64, screen_size: f32| RayTracingLod {
            geometry: RayTracingGeometryHandle(geometry),
            draw_commands: segments.clone(),
            screen_size,
            ..RayTracingLod::default()
        };
        let mut primitive = ScenePrimitive::new(i, BoxSphereBounds::new(origin, Vec3::splat(2.0)), lod(1, 0.3));
        primitive.lods.push(lod(2, 0.05));
        primitive.lods.push(lod(3, 0.0));
        scene.add_primitive(primitive);
    }
    scene
}

fn fresh(count: u32) -> FrameArena<RelevantPrimitive> {
    let mut arena = FrameArena::with_capacity(count as usize);
    arena.extend((0..count).map(|i| RelevantPrimitive::new(i, 0)));
    arena
}

fn bench_lod_resolve(c: &mut Criterion) {
    let scene = build_scene();
    let views = [RayTracingView::new(Vec3::ZERO, Vec3::Z, 1.2)];
    let resolver = ParallelLodResolver::new(&scene, &views);
    let granularity = TaskGranularity::default();
    let rayon = RayonTaskGraph::global();

    c.bench_function("lod_resolve_inline_100k", |b| {
        b.iter(|| {
            let mut relevant = fresh(PRIMITIVE_COUNT);
            resolver.resolve(&InlineTaskGraph, relevant.as_mut_slice(), granularity);
            black_box(relevant.len())
        });
    });

    c.bench_function("lod_resolve_rayon_100k", |b| {
        b.iter(|| {
            let mut relevant = fresh(PRIMITIVE_COUNT);
            resolver.resolve(&rayon, relevant.as_mut_slice(), granularity);
            black_box(relevant.len())
        });
    });
}

criterion_group!(benches, bench_lod_resolve);
criterion_main!(benches);
