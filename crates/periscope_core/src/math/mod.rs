//! Bounds and culling math shared by the occlusion and ray tracing paths.
//!
//! Everything here is `glam`-based and CPU-only.

mod bounds;
mod frustum;

pub use bounds::BoxSphereBounds;
pub use frustum::{Frustum, Plane};
