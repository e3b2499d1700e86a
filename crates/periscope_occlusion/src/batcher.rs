//! # Batched Box Occlusion Tester
//!
//! Packs bounding boxes into shared occlusion queries: up to K boxes are
//! drawn between one begin/end pair, and every primitive in the batch
//! receives the same (reference counted) query handle.
//!
//! A batch's vertices are written as 8 corners per box into a slice of the
//! frame's dynamic vertex buffer; the draw uses one index list shared by
//! every batch.

use bytemuck::{Pod, Zeroable};
use periscope_core::BoxSphereBounds;

use crate::query_pool::{FrameQueryPool, QueryHandle};
use crate::rhi::{DynamicVertexBuffer, OcclusionRhi, VertexAllocation};

/// One box corner as uploaded to the GPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BoxVertex {
    /// World-space position.
    pub position: [f32; 3],
}

/// Triangle list for one box over the corner order of
/// [`BoxSphereBounds::corners`].
pub const CUBE_INDICES: [u16; 36] = [
    0, 1, 3, 0, 3, 2, // -X
    4, 6, 7, 4, 7, 5, // +X
    0, 4, 5, 0, 5, 1, // -Y
    2, 3, 7, 2, 7, 6, // +Y
    0, 2, 6, 0, 6, 4, // -Z
    1, 5, 7, 1, 7, 3, // +Z
];

const CORNERS_PER_BOX: usize = 8;
const BOX_BYTES: usize = CORNERS_PER_BOX * std::mem::size_of::<BoxVertex>();

#[derive(Debug)]
struct OcclusionBatch {
    query: QueryHandle,
    allocation: Option<VertexAllocation>,
    num_boxes: u32,
}

impl OcclusionBatch {
    fn is_null(&self) -> bool {
        self.query.is_null() || self.allocation.is_none()
    }
}

/// Groups primitive bounding boxes into shared queries.
#[derive(Debug)]
pub struct BatchedBoxOcclusionTester {
    max_boxes_per_batch: u32,
    indices: Vec<u16>,
    batches: Vec<OcclusionBatch>,
}

impl BatchedBoxOcclusionTester {
    /// Creates a batcher drawing at most `max_boxes_per_batch` boxes per query.
    #[must_use]
    pub fn new(max_boxes_per_batch: u32) -> Self {
        let max_boxes_per_batch = max_boxes_per_batch.clamp(1, 8191);
        let indices = (0..max_boxes_per_batch as u16)
            .flat_map(|b| CUBE_INDICES.iter().map(move |&i| b * CORNERS_PER_BOX as u16 + i))
            .collect();
        Self {
            max_boxes_per_batch,
            indices,
            batches: Vec::new(),
        }
    }

    /// Boxes per batch.
    #[inline]
    #[must_use]
    pub const fn max_boxes_per_batch(&self) -> u32 {
        self.max_boxes_per_batch
    }

    /// Batches opened since the last flush.
    #[inline]
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// True when nothing was batched since the last flush.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Adds a box and returns the query that will test it, carrying one
    /// reference owned by the caller. [`QueryHandle::NULL`] means the batch
    /// could not get a query or vertex memory; assume visible.
    pub fn batch_primitive(
        &mut self,
        bounds: &BoxSphereBounds,
        pool: &mut FrameQueryPool,
        rhi: &mut dyn OcclusionRhi,
        vertex_buffer: &mut dyn DynamicVertexBuffer,
    ) -> QueryHandle {
        let needs_batch = self
            .batches
            .last()
            .map_or(true, |batch| batch.num_boxes >= self.max_boxes_per_batch);
        if needs_batch {
            let batch = self.open_batch(pool, rhi, vertex_buffer);
            self.batches.push(batch);
        }

        let Some(batch) = self.batches.last_mut() else {
            return QueryHandle::NULL;
        };
        let slot = batch.num_boxes as usize;
        batch.num_boxes += 1;

        let Some(allocation) = batch.allocation.filter(|_| !batch.query.is_null()) else {
            return QueryHandle::NULL;
        };

        let corners = bounds.corners().map(|c| BoxVertex { position: c.to_array() });
        vertex_buffer.write(allocation, slot * BOX_BYTES, bytemuck::cast_slice(&corners));

        pool.add_ref(batch.query);
        batch.query
    }

    fn open_batch(
        &self,
        pool: &mut FrameQueryPool,
        rhi: &mut dyn OcclusionRhi,
        vertex_buffer: &mut dyn DynamicVertexBuffer,
    ) -> OcclusionBatch {
        let mut query = pool.allocate_query(rhi);
        let mut allocation = None;
        if !query.is_null() {
            match vertex_buffer.allocate(self.max_boxes_per_batch as usize * BOX_BYTES) {
                Ok(a) => allocation = Some(a),
                Err(err) => {
                    tracing::warn!(error = %err, "occlusion batch vertex allocation failed");
                    pool.release(query);
                    query = QueryHandle::NULL;
                }
            }
        }
        OcclusionBatch {
            query,
            allocation,
            num_boxes: 0,
        }
    }

    /// Draws every batch inside its query bracket, drops the batches' own
    /// references and resets. Returns the number of batches drawn.
    pub fn flush(&mut self, pool: &mut FrameQueryPool, rhi: &mut dyn OcclusionRhi) -> u32 {
        let mut drawn = 0;
        for batch in self.batches.drain(..) {
            if batch.is_null() {
                continue;
            }
            if let (Some(native), Some(allocation)) = (pool.native(batch.query), batch.allocation) {
                let index_count = batch.num_boxes as usize * CUBE_INDICES.len();
                rhi.begin_query(native);
                rhi.draw_indexed_boxes(allocation, batch.num_boxes, &self.indices[..index_count]);
                rhi.end_query(native);
                drawn += 1;
            }
            pool.release(batch.query);
        }
        drawn
    }

    /// Drops every open batch without drawing.
    pub fn discard(&mut self, pool: &mut FrameQueryPool) {
        for batch in self.batches.drain(..) {
            if !batch.is_null() {
                pool.release(batch.query);
            }
        }
    }
}
