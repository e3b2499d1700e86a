//! # Headless GPU
//!
//! Deterministic CPU stand-in for the occlusion RHI, the dynamic vertex
//! buffer and the HZB pass. Used by tests and the simulator.
//!
//! Visibility comes from an oracle closure that maps a box to a number of
//! passed samples. Results become readable after
//! [`HeadlessGpu::complete_frame`] has been called `completion_latency_frames`
//! times, which models the GPU running behind the CPU.
//!
//! The handle is cheap to clone; clones share one device, so another thread
//! can complete frames while the render thread waits on a fence.

use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;
use periscope_core::{gpu_fence, BoxSphereBounds, CoreError, GpuFuture, GpuPromise, PoolHandle, RhiError, SlotPool};

use crate::batcher::BoxVertex;
use crate::rhi::{DynamicVertexBuffer, HzbRhi, HzbTestRequest, NativeQuery, OcclusionRhi, VertexAllocation};

/// Maps a tested volume to the number of samples that would pass.
pub type VisibilityOracle = Arc<dyn Fn(&BoxSphereBounds) -> u64 + Send + Sync>;

/// Limits of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessGpuConfig {
    /// Native queries that may exist at once.
    pub query_capacity: usize,
    /// Dynamic vertex buffer size per frame.
    pub vertex_buffer_bytes: usize,
    /// `complete_frame` calls before submitted work is readable.
    pub completion_latency_frames: u64,
}

impl Default for HeadlessGpuConfig {
    fn default() -> Self {
        Self {
            query_capacity: 4096,
            vertex_buffer_bytes: 1 << 20,
            completion_latency_frames: 1,
        }
    }
}

/// Work counters of the simulated device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Native queries created.
    pub queries_created: u64,
    /// Draw calls of any kind.
    pub draw_calls: u64,
    /// Boxes drawn through indexed box draws.
    pub boxes_drawn: u64,
    /// HZB test passes submitted.
    pub hzb_submissions: u64,
    /// Calls to `complete_frame`.
    pub frames_completed: u64,
}

#[derive(Debug, Clone, Copy)]
enum HeadlessQuery {
    Idle,
    Recording { samples: u64 },
    Submitted { samples: u64, frame: u64 },
    Complete { samples: u64 },
}

struct PendingHzb {
    frame: u64,
    promise: GpuPromise<Vec<u8>>,
    result: Vec<u8>,
}

struct GpuState {
    config: HeadlessGpuConfig,
    oracle: VisibilityOracle,
    queries: SlotPool<HeadlessQuery>,
    active: Option<PoolHandle>,
    vertex_data: Vec<u8>,
    vertex_used: usize,
    frame: u64,
    pending_hzb: Vec<PendingHzb>,
    lost: bool,
    stats: HeadlessStats,
}

impl GpuState {
    fn record_samples(&mut self, samples: u64) {
        let Some(active) = self.active else {
            return;
        };
        if let Some(HeadlessQuery::Recording { samples: total }) = self.queries.get_mut(active) {
            *total += samples;
        }
    }

    fn ready(&self, frame: u64) -> bool {
        frame + self.config.completion_latency_frames <= self.frame
    }
}

/// CPU-simulated GPU implementing every occlusion-side RHI trait.
#[derive(Clone)]
pub struct HeadlessGpu {
    state: Arc<Mutex<GpuState>>,
}

impl std::fmt::Debug for HeadlessGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HeadlessGpu")
            .field("config", &state.config)
            .field("frame", &state.frame)
            .field("live_queries", &state.queries.len())
            .field("lost", &state.lost)
            .finish_non_exhaustive()
    }
}

impl HeadlessGpu {
    /// Creates a device whose visibility is decided by `oracle`.
    pub fn new<F>(config: HeadlessGpuConfig, oracle: F) -> Self
    where
        F: Fn(&BoxSphereBounds) -> u64 + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(GpuState {
                config,
                oracle: Arc::new(oracle),
                queries: SlotPool::new(config.query_capacity),
                active: None,
                vertex_data: Vec::new(),
                vertex_used: 0,
                frame: 0,
                pending_hzb: Vec::new(),
                lost: false,
                stats: HeadlessStats::default(),
            })),
        }
    }

    /// Replaces the visibility oracle for work submitted from now on.
    pub fn set_oracle<F>(&self, oracle: F)
    where
        F: Fn(&BoxSphereBounds) -> u64 + Send + Sync + 'static,
    {
        self.state.lock().oracle = Arc::new(oracle);
    }

    /// Ends a GPU frame: completes queries and signals HZB fences whose
    /// latency has elapsed.
    pub fn complete_frame(&self) {
        let mut state = self.state.lock();
        state.frame += 1;
        state.stats.frames_completed += 1;

        let latency = state.config.completion_latency_frames;
        let now = state.frame;
        for (_, query) in state.queries.iter_mut() {
            if let HeadlessQuery::Submitted { samples, frame } = *query {
                if frame + latency <= now {
                    *query = HeadlessQuery::Complete { samples };
                }
            }
        }

        let pending = std::mem::take(&mut state.pending_hzb);
        for hzb in pending {
            if state.ready(hzb.frame) {
                hzb.promise.signal(hzb.result);
            } else {
                state.pending_hzb.push(hzb);
            }
        }
    }

    /// Simulates device removal: pending fences are dropped unsignalled and
    /// every read fails until [`HeadlessGpu::restore_device`].
    pub fn lose_device(&self) {
        let mut state = self.state.lock();
        state.lost = true;
        let dropped = state.pending_hzb.len();
        state.pending_hzb.clear();
        tracing::warn!(dropped_fences = dropped, "headless device lost");
    }

    /// Brings a lost device back.
    pub fn restore_device(&self) {
        self.state.lock().lost = false;
    }

    /// Native queries currently alive.
    #[must_use]
    pub fn live_queries(&self) -> usize {
        self.state.lock().queries.len()
    }

    /// GPU frames completed so far.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.state.lock().frame
    }

    /// Work counters.
    #[must_use]
    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats
    }

    fn handle(query: NativeQuery) -> PoolHandle {
        PoolHandle::from_bits(query.0)
    }
}

impl OcclusionRhi for HeadlessGpu {
    fn create_query(&mut self) -> Result<NativeQuery, RhiError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RhiError::DeviceLost);
        }
        let handle = state.queries.try_insert(HeadlessQuery::Idle).map_err(|e| match e {
            CoreError::PoolExhausted { capacity } => RhiError::QueryExhausted { capacity },
            _ => RhiError::DeviceLost,
        })?;
        state.stats.queries_created += 1;
        Ok(NativeQuery(handle.to_bits()))
    }

    fn release_query(&mut self, query: NativeQuery) {
        let mut state = self.state.lock();
        let handle = Self::handle(query);
        if state.active == Some(handle) {
            state.active = None;
        }
        if state.queries.remove(handle).is_err() {
            tracing::debug!(query = query.0, "release of unknown headless query");
        }
    }

    fn is_query_complete(&self, query: NativeQuery) -> bool {
        let state = self.state.lock();
        matches!(
            state.queries.get(Self::handle(query)),
            Some(HeadlessQuery::Idle | HeadlessQuery::Complete { .. })
        )
    }

    fn query_result(&mut self, query: NativeQuery, wait: bool) -> Result<Option<u64>, RhiError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(RhiError::DeviceLost);
        }
        let slot = state
            .queries
            .get_mut(Self::handle(query))
            .ok_or(RhiError::UnknownQuery(query.0))?;
        match *slot {
            HeadlessQuery::Complete { samples } => Ok(Some(samples)),
            HeadlessQuery::Submitted { samples, .. } if wait => {
                *slot = HeadlessQuery::Complete { samples };
                Ok(Some(samples))
            }
            HeadlessQuery::Idle | HeadlessQuery::Recording { .. } if wait => {
                Err(RhiError::UnknownQuery(query.0))
            }
            _ => Ok(None),
        }
    }

    fn begin_query(&mut self, query: NativeQuery) {
        let mut state = self.state.lock();
        let handle = Self::handle(query);
        if let Some(slot) = state.queries.get_mut(handle) {
            *slot = HeadlessQuery::Recording { samples: 0 };
            state.active = Some(handle);
        }
    }

    fn end_query(&mut self, query: NativeQuery) {
        let mut state = self.state.lock();
        let handle = Self::handle(query);
        if state.active != Some(handle) {
            return;
        }
        state.active = None;
        let frame = state.frame;
        if let Some(slot) = state.queries.get_mut(handle) {
            if let HeadlessQuery::Recording { samples } = *slot {
                *slot = HeadlessQuery::Submitted { samples, frame };
            }
        }
    }

    fn draw_indexed_boxes(&mut self, allocation: VertexAllocation, num_boxes: u32, indices: &[u16]) {
        let mut state = self.state.lock();
        state.stats.draw_calls += 1;

        let stride = std::mem::size_of::<BoxVertex>();
        let bytes = num_boxes as usize * 8 * stride;
        if indices.len() < num_boxes as usize * 36 || bytes > allocation.len {
            tracing::warn!(num_boxes, "indexed box draw with short buffers ignored");
            return;
        }
        let Some(data) = state.vertex_data.get(allocation.offset..allocation.offset + bytes) else {
            return;
        };

        let vertices: Vec<BoxVertex> = data
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned::<BoxVertex>)
            .collect();
        let oracle = Arc::clone(&state.oracle);
        let mut samples = 0;
        for corners in vertices.chunks_exact(8) {
            let (min, max) = corners.iter().fold(
                (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                |(min, max), v| {
                    let p = Vec3::from(v.position);
                    (min.min(p), max.max(p))
                },
            );
            samples += oracle(&BoxSphereBounds::from_min_max(min, max));
        }
        state.stats.boxes_drawn += u64::from(num_boxes);
        state.record_samples(samples);
    }

    fn draw_box(&mut self, center: Vec3, extent: Vec3) {
        let mut state = self.state.lock();
        state.stats.draw_calls += 1;
        let samples = (state.oracle)(&BoxSphereBounds::new(center, extent));
        state.record_samples(samples);
    }

    fn draw_sphere(&mut self, center: Vec3, radius: f32) {
        let mut state = self.state.lock();
        state.stats.draw_calls += 1;
        let samples = (state.oracle)(&BoxSphereBounds {
            origin: center,
            box_extent: Vec3::splat(radius),
            sphere_radius: radius,
        });
        state.record_samples(samples);
    }
}

impl DynamicVertexBuffer for HeadlessGpu {
    fn begin_frame(&mut self) {
        self.state.lock().vertex_used = 0;
    }

    fn allocate(&mut self, bytes: usize) -> Result<VertexAllocation, RhiError> {
        let mut state = self.state.lock();
        let available = state.config.vertex_buffer_bytes - state.vertex_used;
        if bytes > available {
            return Err(RhiError::VertexBufferFull {
                requested: bytes,
                available,
            });
        }
        let offset = state.vertex_used;
        state.vertex_used += bytes;
        if state.vertex_data.len() < state.vertex_used {
            let used = state.vertex_used;
            state.vertex_data.resize(used, 0);
        }
        Ok(VertexAllocation { offset, len: bytes })
    }

    fn write(&mut self, allocation: VertexAllocation, offset: usize, data: &[u8]) {
        let mut state = self.state.lock();
        if offset + data.len() > allocation.len {
            tracing::warn!(offset, len = data.len(), "vertex write past allocation ignored");
            return;
        }
        let start = allocation.offset + offset;
        if let Some(target) = state.vertex_data.get_mut(start..start + data.len()) {
            target.copy_from_slice(data);
        }
    }
}

impl HzbRhi for HeadlessGpu {
    fn submit_hzb_test(&mut self, request: HzbTestRequest<'_>) -> GpuFuture<Vec<u8>> {
        let (promise, future) = gpu_fence();
        let mut state = self.state.lock();
        if state.lost {
            drop(promise);
            return future;
        }
        state.stats.hzb_submissions += 1;

        let texels = (request.size_x * request.size_y) as usize;
        let oracle = Arc::clone(&state.oracle);
        let mut result = vec![0_u8; texels];
        for (texel, out) in result.iter_mut().enumerate() {
            let (Some(center), Some(extent)) = (request.centers.get(texel), request.extents.get(texel)) else {
                break;
            };
            if !extent.is_used() {
                continue;
            }
            let bounds = BoxSphereBounds::new(center.xyz(), extent.xyz());
            if oracle(&bounds) > 0 {
                *out = 255;
            }
        }

        let frame = state.frame;
        state.pending_hzb.push(PendingHzb {
            frame,
            promise,
            result,
        });
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_completes_after_latency() {
        let mut gpu = HeadlessGpu::new(HeadlessGpuConfig::default(), |_| 5);
        let q = gpu.create_query().unwrap();
        gpu.begin_query(q);
        gpu.draw_box(Vec3::ZERO, Vec3::ONE);
        gpu.end_query(q);

        assert!(!gpu.is_query_complete(q));
        assert_eq!(gpu.query_result(q, false), Ok(None));
        gpu.complete_frame();
        assert!(gpu.is_query_complete(q));
        assert_eq!(gpu.query_result(q, false), Ok(Some(5)));
    }

    #[test]
    fn test_blocking_read_completes() {
        let mut gpu = HeadlessGpu::new(HeadlessGpuConfig::default(), |_| 3);
        let q = gpu.create_query().unwrap();
        gpu.begin_query(q);
        gpu.draw_sphere(Vec3::ZERO, 1.0);
        gpu.end_query(q);
        assert_eq!(gpu.query_result(q, true), Ok(Some(3)));
    }

    #[test]
    fn test_capacity_exhaustion() {
        let config = HeadlessGpuConfig {
            query_capacity: 1,
            ..HeadlessGpuConfig::default()
        };
        let mut gpu = HeadlessGpu::new(config, |_| 0);
        let _q = gpu.create_query().unwrap();
        assert_eq!(
            gpu.create_query(),
            Err(RhiError::QueryExhausted { capacity: 1 })
        );
    }

    #[test]
    fn test_vertex_buffer_full() {
        let config = HeadlessGpuConfig {
            vertex_buffer_bytes: 100,
            ..HeadlessGpuConfig::default()
        };
        let mut gpu = HeadlessGpu::new(config, |_| 0);
        assert!(gpu.allocate(96).is_ok());
        assert_eq!(
            gpu.allocate(96),
            Err(RhiError::VertexBufferFull {
                requested: 96,
                available: 4
            })
        );
        gpu.begin_frame();
        assert!(gpu.allocate(96).is_ok());
    }

    #[test]
    fn test_lost_device_fails_reads() {
        let mut gpu = HeadlessGpu::new(HeadlessGpuConfig::default(), |_| 1);
        let q = gpu.create_query().unwrap();
        gpu.lose_device();
        assert_eq!(gpu.query_result(q, false), Err(RhiError::DeviceLost));
        assert_eq!(gpu.create_query(), Err(RhiError::DeviceLost));
        gpu.restore_device();
        assert!(gpu.create_query().is_ok());
    }
}
