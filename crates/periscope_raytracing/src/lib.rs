//! # Periscope Ray Tracing
//!
//! Per-frame gathering of the ray tracing scene: which primitives rays can
//! hit, at which LOD, and how many top-level instances that takes.
//!
//! ## Frame Flow
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────────┐   ┌───────┐   ┌───────┐
//! │ Relevance │──►│ LOD resolve ∥ dyn gather │──►│ Dedup │──►│ Build │
//! └───────────┘   └──────────────────────────┘   └───────┘   └───────┘
//!   per view        task graph, one join           keyed       forced builds,
//!   flags/lists                                    merge       update fence
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **Per-frame data lives in `FrameArena`s** - reset, never freed, each frame
//! 2. **Parallel tasks own disjoint ranges** - the join is the only barrier
//! 3. **Async compute needs a `PipeTransition`** - the type forbids skipping it
//! 4. **Compiling geometry is force-built** - never silently dropped

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod assembler;
pub mod config;
pub mod dedup;
pub mod error;
pub mod gather;
pub mod headless;
pub mod instance;
pub mod lod;
pub mod relevance;
pub mod rhi;
pub mod scene;

pub use assembler::{AssemblyStats, BuildReport, RayTracingSceneAssembler, RayTracingSceneFrame};
pub use config::{LodResolverConfig, RayTracingConfig, RelevanceCullingConfig};
pub use dedup::{instance_key, DedupOutput, DedupStats, InstanceDeduplicator};
pub use error::{RayTracingError, RayTracingResult};
pub use gather::{DynamicGatherOutput, DynamicGatherShard, DynamicGeometryGatherer, NoDynamicGeometry};
pub use headless::{HeadlessDynamicGatherer, HeadlessRayTracingBackend, HeadlessRayTracingStats};
pub use instance::{InstanceDescriptor, InstanceFlags, SceneInstanceEntry};
pub use lod::ParallelLodResolver;
pub use relevance::{
    DynamicPrimitive, RayTracingRelevanceFilter, Relevance, RelevanceStats, RelevantPrimitive, SkipReason,
};
pub use rhi::{AccelerationStructureBuilder, GeometryUpdateRequest, GeometryUpdateRhi, PipeTransition};
pub use scene::{
    CachedDrawCommand, GeometryBuildState, PrimitiveFlags, PrimitiveIndex, RayTracingGeometryHandle,
    RayTracingLod, RayTracingScene, RayTracingView, ScenePrimitive, RAY_TRACING_MASK_SHADOW,
};
