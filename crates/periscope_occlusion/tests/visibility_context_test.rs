//! Integration tests for per-view occlusion across frames.

use glam::Vec3;
use periscope_core::BoxSphereBounds;
use periscope_occlusion::{
    HeadlessGpu, HeadlessGpuConfig, OcclusionConfig, OcclusionPrimitive, OcclusionView,
    PrimitiveOcclusionKey, ReflectionKey, ReflectionQuery, ShadowKey, ShadowQuery,
    ShadowQueryPolicy, VisibilityContext,
};

fn view() -> OcclusionView {
    OcclusionView::perspective(
        Vec3::ZERO,
        Vec3::NEG_Z,
        std::f32::consts::FRAC_PI_2,
        (100, 100),
        0.1,
        1000.0,
    )
}

fn boxed(x: f32, z: f32) -> BoxSphereBounds {
    BoxSphereBounds::new(Vec3::new(x, 0.0, z), Vec3::ONE)
}

fn hidden_gpu() -> HeadlessGpu {
    HeadlessGpu::new(HeadlessGpuConfig::default(), |_| 0)
}

#[derive(Default)]
struct FrameInput {
    primitives: Vec<OcclusionPrimitive>,
    shadows: Vec<ShadowQuery>,
    reflections: Vec<ReflectionQuery>,
}

fn run_frame(
    ctx: &mut VisibilityContext,
    gpu: &mut HeadlessGpu,
    view: &OcclusionView,
    time: f64,
    input: &FrameInput,
) {
    let mut vb = gpu.clone();
    let mut hzb_rhi = gpu.clone();
    let mut frame = ctx.begin_frame(view, time);
    frame
        .allocate_queries(gpu, &mut vb, &input.primitives, &input.shadows, &input.reflections)
        .unwrap();
    frame.issue_queries(gpu, &mut hzb_rhi).unwrap();
    frame.read_previous_results(gpu).unwrap();
    frame.trim().unwrap();
    gpu.complete_frame();
}

fn primitives(bounds: &[BoxSphereBounds]) -> FrameInput {
    FrameInput {
        primitives: bounds
            .iter()
            .enumerate()
            .map(|(i, b)| OcclusionPrimitive::new(i as u32, *b))
            .collect(),
        ..FrameInput::default()
    }
}

#[test]
fn test_new_primitive_visible_then_occluded() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let input = primitives(&[boxed(0.0, -10.0)]);
    let key = PrimitiveOcclusionKey::new(0);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert!(ctx.is_primitive_visible(key));

    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert!(!ctx.is_primitive_visible(key));
    assert_eq!(ctx.stats().primitives_occluded, 1);
    let history = ctx.history(key).unwrap();
    assert!(history.was_occluded_last_frame);
    assert!(history.occlusion_state_was_definite_last_frame);
}

#[test]
fn test_results_lag_by_buffered_frames() {
    let mut gpu = hidden_gpu();
    let config = OcclusionConfig {
        buffered_frames: 2,
        ..OcclusionConfig::default()
    };
    let mut ctx = VisibilityContext::new(config).unwrap();
    let input = primitives(&[boxed(0.0, -10.0)]);
    let key = PrimitiveOcclusionKey::new(0);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert!(ctx.is_primitive_visible(key));
    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert!(ctx.is_primitive_visible(key));
    run_frame(&mut ctx, &mut gpu, &view(), 0.2, &input);
    assert!(!ctx.is_primitive_visible(key));
}

#[test]
fn test_becomes_visible_again_through_grouped_query() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let input = primitives(&[boxed(0.0, -10.0), boxed(3.0, -10.0)]);
    let key = PrimitiveOcclusionKey::new(0);

    for frame in 0..3 {
        run_frame(&mut ctx, &mut gpu, &view(), f64::from(frame) * 0.1, &input);
    }
    assert!(!ctx.is_primitive_visible(key));

    gpu.set_oracle(|_| 40);
    run_frame(&mut ctx, &mut gpu, &view(), 0.3, &input);
    // Frame 3 still reads the query drawn while hidden.
    assert!(!ctx.is_primitive_visible(key));
    run_frame(&mut ctx, &mut gpu, &view(), 0.4, &input);
    assert!(ctx.is_primitive_visible(key));
    // Grouped results are not definite.
    assert!(!ctx.history(key).unwrap().occlusion_state_was_definite_last_frame);
}

#[test]
fn test_frustum_culled_primitive_is_invisible_without_history() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let input = primitives(&[boxed(0.0, 10.0)]);
    let key = PrimitiveOcclusionKey::new(0);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert!(!ctx.is_primitive_visible(key));
    assert_eq!(ctx.stats().primitives_frustum_culled, 1);
    assert!(ctx.history(key).is_none());
}

#[test]
fn test_trivially_visible_primitives_never_queried() {
    let mut gpu = hidden_gpu();
    let config = OcclusionConfig {
        never_occlusion_test_distance: 5.0,
        huge_bounds_radius: 100.0,
        ..OcclusionConfig::default()
    };
    let mut ctx = VisibilityContext::new(config).unwrap();
    let mut input = primitives(&[
        boxed(0.0, -20.0),
        boxed(0.0, -3.0),
        boxed(0.0, -0.5),
        BoxSphereBounds::new(Vec3::new(0.0, 0.0, -300.0), Vec3::splat(80.0)),
    ]);
    input.primitives[0].can_be_occluded = false;

    for frame in 0..4 {
        run_frame(&mut ctx, &mut gpu, &view(), f64::from(frame), &input);
        for i in 0..4 {
            assert!(ctx.is_primitive_visible(PrimitiveOcclusionKey::new(i)));
        }
        assert_eq!(ctx.stats().primitives_trivially_visible, 4);
        assert_eq!(ctx.stats().queries_issued, 0);
    }
}

#[test]
fn test_query_exhaustion_assumes_visible() {
    let mut gpu = HeadlessGpu::new(
        HeadlessGpuConfig {
            query_capacity: 0,
            ..HeadlessGpuConfig::default()
        },
        |_| 0,
    );
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let input = primitives(&[boxed(0.0, -10.0), boxed(2.0, -10.0)]);

    for frame in 0..4 {
        run_frame(&mut ctx, &mut gpu, &view(), f64::from(frame), &input);
        assert!(ctx.is_primitive_visible(PrimitiveOcclusionKey::new(0)));
        assert!(ctx.is_primitive_visible(PrimitiveOcclusionKey::new(1)));
    }
    assert!(ctx.stats().allocation_failures > 0);
}

#[test]
fn test_ignore_existing_queries_keeps_history() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let input = primitives(&[boxed(0.0, -10.0)]);
    let key = PrimitiveOcclusionKey::new(0);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert!(!ctx.is_primitive_visible(key));

    let mut cut = view();
    cut.ignore_existing_queries = true;
    run_frame(&mut ctx, &mut gpu, &cut, 0.2, &input);
    assert!(ctx.is_primitive_visible(key));
    assert!(ctx.history(key).unwrap().was_occluded_last_frame);
}

#[test]
fn test_shadow_policies() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let tested = ShadowKey { light: 1, primitive: 7 };
    let inside = ShadowKey { light: 2, primitive: 7 };
    let input = FrameInput {
        shadows: vec![
            ShadowQuery {
                key: tested,
                bounds: boxed(0.0, -20.0),
                policy: ShadowQueryPolicy::BoundingBox,
            },
            ShadowQuery {
                key: inside,
                bounds: boxed(0.0, -20.0),
                policy: ShadowQueryPolicy::LightInfluenceSphere {
                    center: Vec3::new(0.0, 0.0, -2.0),
                    radius: 10.0,
                },
            },
        ],
        ..FrameInput::default()
    };

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert!(!ctx.is_shadow_occluded(tested));
    assert_eq!(ctx.stats().shadow_queries, 1);

    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert!(ctx.is_shadow_occluded(tested));
    assert!(!ctx.is_shadow_occluded(inside));
    assert!(!ctx.is_shadow_occluded(ShadowKey { light: 9, primitive: 9 }));
}

#[test]
fn test_reflection_occlusion() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let mirror = ReflectionKey(1);
    let behind = ReflectionKey(2);
    let input = FrameInput {
        reflections: vec![
            ReflectionQuery {
                key: mirror,
                bounds: boxed(0.0, -15.0),
            },
            ReflectionQuery {
                key: behind,
                bounds: boxed(0.0, 15.0),
            },
        ],
        ..FrameInput::default()
    };

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert!(!ctx.is_reflection_occluded(mirror));
    assert!(ctx.is_reflection_occluded(behind));

    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert!(ctx.is_reflection_occluded(mirror));
}

#[test]
fn test_hzb_mode() {
    let mut gpu = HeadlessGpu::new(HeadlessGpuConfig::default(), |b| u64::from(b.origin.x > 0.0));
    let config = OcclusionConfig {
        use_hzb: true,
        hzb_size_x: 8,
        hzb_size_y: 8,
        ..OcclusionConfig::default()
    };
    let mut ctx = VisibilityContext::new(config).unwrap();
    let input = primitives(&[boxed(-2.0, -10.0), boxed(2.0, -10.0)]);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert_eq!(ctx.stats().hzb_bounds_tested, 2);
    assert_eq!(ctx.stats().queries_issued, 0);

    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert!(!ctx.is_primitive_visible(PrimitiveOcclusionKey::new(0)));
    assert!(ctx.is_primitive_visible(PrimitiveOcclusionKey::new(1)));
}

#[test]
fn test_full_hzb_counts_each_overflow_once() {
    let mut gpu = hidden_gpu();
    let config = OcclusionConfig {
        use_hzb: true,
        hzb_size_x: 8,
        hzb_size_y: 8,
        ..OcclusionConfig::default()
    };
    let mut ctx = VisibilityContext::new(config).unwrap();
    let bounds: Vec<_> = (0..65u8).map(|i| boxed(f32::from(i) - 32.0, -50.0)).collect();
    let input = primitives(&bounds);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert_eq!(ctx.stats().hzb_bounds_tested, 64);
    assert_eq!(ctx.stats().allocation_failures, 1);
    assert_eq!(ctx.stats().queries_issued, 0);
    for i in 0..65 {
        assert!(ctx.is_primitive_visible(PrimitiveOcclusionKey::new(i)));
    }
}

#[test]
fn test_newly_tested_expansion_follows_consideration_gap() {
    let mut gpu = hidden_gpu();
    let config = OcclusionConfig {
        expand_newly_tested_bounds: 5.0,
        frames_not_tested_to_expand: 1,
        frames_to_expand_newly_tested: 2,
        ..OcclusionConfig::default()
    };
    let mut ctx = VisibilityContext::new(config).unwrap();
    // Only the expanded box reaches the near plane.
    let input = primitives(&[boxed(0.0, -4.0)]);
    let key = PrimitiveOcclusionKey::new(0);

    // A new history has no gap, so it is queried with its own bounds.
    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    assert_eq!(ctx.stats().primitives_trivially_visible, 0);
    assert_eq!(ctx.stats().queries_issued, 1);

    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert_eq!(ctx.stats().primitives_trivially_visible, 0);
    assert!(!ctx.is_primitive_visible(key));

    // Skipped for one frame: the gap of two exceeds the threshold.
    run_frame(&mut ctx, &mut gpu, &view(), 0.2, &FrameInput::default());
    run_frame(&mut ctx, &mut gpu, &view(), 0.3, &input);
    assert_eq!(ctx.stats().primitives_trivially_visible, 1);
    assert!(ctx.is_primitive_visible(key));

    // Second frame of the cooldown, then back to the plain bounds.
    run_frame(&mut ctx, &mut gpu, &view(), 0.4, &input);
    assert_eq!(ctx.stats().primitives_trivially_visible, 1);
    run_frame(&mut ctx, &mut gpu, &view(), 0.5, &input);
    assert_eq!(ctx.stats().primitives_trivially_visible, 0);
    assert_eq!(ctx.history(key).unwrap().expansion_cooldown, 0);
}

#[test]
fn test_hzb_device_loss_reports_visible() {
    let mut gpu = hidden_gpu();
    let config = OcclusionConfig {
        use_hzb: true,
        hzb_size_x: 8,
        hzb_size_y: 8,
        ..OcclusionConfig::default()
    };
    let mut ctx = VisibilityContext::new(config).unwrap();
    let input = primitives(&[boxed(0.0, -10.0)]);
    let key = PrimitiveOcclusionKey::new(0);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &input);
    run_frame(&mut ctx, &mut gpu, &view(), 0.1, &input);
    assert!(!ctx.is_primitive_visible(key));

    gpu.lose_device();
    run_frame(&mut ctx, &mut gpu, &view(), 0.2, &input);
    run_frame(&mut ctx, &mut gpu, &view(), 0.3, &input);
    assert!(ctx.is_primitive_visible(key));

    gpu.restore_device();
    run_frame(&mut ctx, &mut gpu, &view(), 0.4, &input);
    run_frame(&mut ctx, &mut gpu, &view(), 0.5, &input);
    assert!(!ctx.is_primitive_visible(key));
}

#[test]
fn test_trim_evicts_stale_histories() {
    let mut gpu = hidden_gpu();
    let config = OcclusionConfig {
        min_query_time: 1.0,
        min_history_time: 2.0,
        ..OcclusionConfig::default()
    };
    let mut ctx = VisibilityContext::new(config).unwrap();
    let both = primitives(&[boxed(0.0, -10.0), boxed(2.0, -10.0)]);
    let only_first = primitives(&[boxed(0.0, -10.0)]);

    run_frame(&mut ctx, &mut gpu, &view(), 0.0, &both);
    assert_eq!(ctx.num_histories(), 2);
    for frame in 1..=6 {
        run_frame(&mut ctx, &mut gpu, &view(), f64::from(frame), &only_first);
    }
    // Frame 6 trims: primitive 1 was last considered at t = 0.
    assert_eq!(ctx.num_histories(), 1);
    assert_eq!(ctx.stats().records_trimmed, 1);
    assert!(ctx.history(PrimitiveOcclusionKey::new(1)).is_none());
}

#[test]
fn test_buffered_frame_change_migrates() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig {
        buffered_frames: 3,
        ..OcclusionConfig::default()
    })
    .unwrap();
    let input = primitives(&[boxed(0.0, -10.0), boxed(2.0, -10.0)]);

    for frame in 0..4 {
        run_frame(&mut ctx, &mut gpu, &view(), f64::from(frame), &input);
    }
    ctx.set_config(OcclusionConfig::default()).unwrap();
    for frame in 4..8 {
        run_frame(&mut ctx, &mut gpu, &view(), f64::from(frame), &input);
    }
    assert_eq!(ctx.buffered_frames(), 1);
    assert!(!ctx.is_primitive_visible(PrimitiveOcclusionKey::new(0)));
    // One query per primitive in flight, no leaked references.
    assert!(ctx.query_pool().outstanding_count() <= 2);
}

#[test]
fn test_destroy_releases_everything() {
    let mut gpu = hidden_gpu();
    let mut ctx = VisibilityContext::new(OcclusionConfig::default()).unwrap();
    let mut input = primitives(&[boxed(0.0, -10.0), boxed(2.0, -10.0)]);
    input.shadows.push(ShadowQuery {
        key: ShadowKey { light: 0, primitive: 0 },
        bounds: boxed(0.0, -20.0),
        policy: ShadowQueryPolicy::BoundingBox,
    });
    for frame in 0..3 {
        run_frame(&mut ctx, &mut gpu, &view(), f64::from(frame), &input);
    }
    assert!(gpu.live_queries() > 0);

    let mut rhi = gpu.clone();
    ctx.destroy(&mut rhi);
    assert_eq!(gpu.live_queries(), 0);
    assert_eq!(ctx.num_histories(), 0);
    assert!(ctx.is_primitive_visible(PrimitiveOcclusionKey::new(0)));
}
