//! # Visibility Simulator
//!
//! Drives the frame pipeline over a synthetic world on the headless
//! devices and prints a summary.
//!
//! ```text
//! visibility_sim [config.toml] [frames]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::process::ExitCode;

use glam::Vec3;
use periscope::core::RayonTaskGraph;
use periscope::occlusion::{HeadlessGpu, HeadlessGpuConfig, OcclusionView};
use periscope::raytracing::{HeadlessDynamicGatherer, HeadlessRayTracingBackend, RayTracingView};
use periscope::{FrameDevices, FrameInput, FramePipeline, PeriscopeConfig, PeriscopeResult, SyntheticWorld, WorldParams};
use tracing_subscriber::EnvFilter;

const DEFAULT_FRAMES: u32 = 120;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "simulation failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> PeriscopeResult<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PeriscopeConfig::load(&path)?,
        None => PeriscopeConfig::default(),
    };
    let frames = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);

    let world = SyntheticWorld::generate(WorldParams::default());
    let oracle = world.oracle();
    let mut gpu = HeadlessGpu::new(HeadlessGpuConfig::default(), move |bounds| oracle(bounds));
    let mut vertex_buffer = gpu.clone();
    let mut hzb = gpu.clone();
    let mut backend = HeadlessRayTracingBackend::new();
    let mut builder = backend.clone();
    let gatherer = HeadlessDynamicGatherer::default();

    let mut pipeline = FramePipeline::new(config, RayonTaskGraph::global())?;
    tracing::info!(frames, props = world.primitives.len(), "simulation started");

    for frame in 0..frames {
        // Slow strafe along X keeps the wall between the camera and most props.
        let origin = Vec3::new((f64::from(frame) * 0.05).sin() as f32 * 10.0, 1.7, 0.0);
        let view = OcclusionView::perspective(
            origin,
            Vec3::NEG_Z,
            std::f32::consts::FRAC_PI_3,
            (1920, 1080),
            0.1,
            2000.0,
        );
        let ray_tracing_views = [RayTracingView::new(origin, Vec3::NEG_Z, std::f32::consts::FRAC_PI_3)];
        let input = FrameInput {
            view: &view,
            time: f64::from(frame) / 60.0,
            primitives: &world.primitives,
            shadows: &[],
            reflections: &[],
            scene: &world.scene,
            ray_tracing_views: &ray_tracing_views,
        };
        let mut devices = FrameDevices {
            occlusion: &mut gpu,
            vertex_buffer: &mut vertex_buffer,
            hzb: &mut hzb,
            geometry_updates: &mut backend,
            builder: &mut builder,
            gatherer: &gatherer,
        };
        pipeline.run_frame(&input, &mut devices)?;
        gpu.complete_frame();
    }

    let stats = pipeline.stats();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    VISIBILITY SIMULATION SUMMARY                 ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!("Frames:            {}", stats.frames_recorded);
    println!("Average frame:     {:.3} ms", stats.avg_frame_ms());
    println!("Min / max frame:   {:.3} / {:.3} ms", stats.min_frame_us as f64 / 1000.0, stats.max_frame_us as f64 / 1000.0);
    println!("Over budget:       {}", stats.frames_over_budget);
    println!("Occlusion rate:    {:.1}%", stats.occlusion_rate() * 100.0);
    println!("Transforms/entry:  {:.2}", stats.instancing_ratio());
    println!("Update fences lost: {}", stats.fences_lost);

    pipeline.destroy(&mut gpu);
    tracing::info!(live_queries = gpu.live_queries(), "simulation finished");
    Ok(())
}
