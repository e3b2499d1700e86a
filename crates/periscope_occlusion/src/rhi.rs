//! # Render Hardware Interface
//!
//! The GPU-facing collaborators the occlusion code drives. Implementations
//! own the native objects; this crate only holds opaque ids.

use glam::Vec3;
use periscope_core::{GpuFuture, RhiError};

use crate::hzb::HzbTexel;

/// Opaque id of a native occlusion query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeQuery(pub u64);

/// A byte range inside the frame's dynamic vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAllocation {
    /// Start offset in bytes.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

/// Native occlusion query objects plus the draws that feed them.
pub trait OcclusionRhi {
    /// Creates a native query.
    ///
    /// # Errors
    ///
    /// [`RhiError::QueryExhausted`] when the query heap is full,
    /// [`RhiError::DeviceLost`] when the device is gone.
    fn create_query(&mut self) -> Result<NativeQuery, RhiError>;

    /// Destroys a native query.
    fn release_query(&mut self, query: NativeQuery);

    /// True when the query has no outstanding GPU work.
    fn is_query_complete(&self, query: NativeQuery) -> bool;

    /// Reads the passed-sample count. `Ok(None)` means "not ready yet";
    /// with `wait` the call stalls until the result exists.
    ///
    /// # Errors
    ///
    /// Any backend failure; callers treat it as "unknown".
    fn query_result(&mut self, query: NativeQuery, wait: bool) -> Result<Option<u64>, RhiError>;

    /// Opens the query bracket.
    fn begin_query(&mut self, query: NativeQuery);

    /// Closes the query bracket.
    fn end_query(&mut self, query: NativeQuery);

    /// Draws `num_boxes` boxes whose 8 corners each were written to
    /// `allocation`, using the shared cube index list.
    fn draw_indexed_boxes(&mut self, allocation: VertexAllocation, num_boxes: u32, indices: &[u16]);

    /// Draws a single box volume.
    fn draw_box(&mut self, center: Vec3, extent: Vec3);

    /// Draws a sphere volume.
    fn draw_sphere(&mut self, center: Vec3, radius: f32);
}

/// Transient per-frame vertex memory.
pub trait DynamicVertexBuffer {
    /// Called once at the start of a frame; earlier allocations are dead.
    fn begin_frame(&mut self);

    /// Reserves `bytes` bytes.
    ///
    /// # Errors
    ///
    /// [`RhiError::VertexBufferFull`] when the buffer has no room left.
    fn allocate(&mut self, bytes: usize) -> Result<VertexAllocation, RhiError>;

    /// Copies `data` into `allocation` starting at `offset` bytes.
    fn write(&mut self, allocation: VertexAllocation, offset: usize, data: &[u8]);
}

/// Everything the HZB test pass needs for one submission.
#[derive(Debug, Clone, Copy)]
pub struct HzbTestRequest<'a> {
    /// Texture width in texels.
    pub size_x: u32,
    /// Texture height in texels.
    pub size_y: u32,
    /// Number of volumes written.
    pub num_bounds: u32,
    /// Bounds centers, one texel per volume, block-swizzled.
    pub centers: &'a [HzbTexel],
    /// Bounds extents, same layout as `centers`.
    pub extents: &'a [HzbTexel],
}

/// GPU pass that tests packed bounds against the depth pyramid.
pub trait HzbRhi {
    /// Uploads both textures, runs the test, copies the byte-per-texel
    /// result to CPU-readable memory and returns the fence for it.
    fn submit_hzb_test(&mut self, request: HzbTestRequest<'_>) -> GpuFuture<Vec<u8>>;
}
