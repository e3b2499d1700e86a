//! # HZB Occlusion Tester
//!
//! Tests many bounding volumes against the depth pyramid in one GPU pass.
//!
//! ```text
//!  add_bounds ──► submit ──────────────► map_results ──► is_visible ──► unmap_results
//!  (CPU texels)   (GPU test + readback)   (waits fence)   (1 byte/volume)
//! ```
//!
//! Bounds are packed into two RGBA32F textures (centers and extents) laid
//! out in 8x8 texel blocks. The GPU writes one byte per texel; non-zero
//! means visible. Readbacks queue up because results are consumed a few
//! frames after submission; every readback carries the frame it was
//! submitted in, and mapped data is only trusted for that frame.

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use periscope_core::{FenceError, GpuFuture};

use crate::error::{OcclusionError, OcclusionResult};
use crate::rhi::{HzbRhi, HzbTestRequest};

const BLOCK_SIZE: u32 = 8;
const BLOCK_TEXELS: u32 = BLOCK_SIZE * BLOCK_SIZE;
const FRAME_NUMBER_MASK: u32 = 0x7fff_ffff;
const INVALID_FRAME_NUMBER: u32 = u32::MAX;
/// The single byte served for every volume when no readback is trusted.
const FALLBACK_RESULT: u8 = 255;

/// One RGBA32F texel of the bounds textures.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HzbTexel(pub [f32; 4]);

impl HzbTexel {
    /// Packs a vector with `w` in the alpha channel.
    #[inline]
    #[must_use]
    pub fn new(v: Vec3, w: f32) -> Self {
        Self([v.x, v.y, v.z, w])
    }

    /// The RGB channels.
    #[inline]
    #[must_use]
    pub fn xyz(&self) -> Vec3 {
        Vec3::new(self.0[0], self.0[1], self.0[2])
    }

    /// True when a volume was written to this texel.
    #[inline]
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.0[3] > 0.0
    }
}

#[derive(Debug)]
struct HzbReadback {
    future: GpuFuture<Vec<u8>>,
    frame: u32,
}

#[derive(Debug)]
enum MappedResults {
    Data(Vec<u8>),
    Fallback,
}

/// Per-view HZB test state: pending bounds, in-flight readbacks and the
/// currently mapped result buffer.
#[derive(Debug)]
pub struct HzbOcclusionTester {
    size_x: u32,
    size_y: u32,
    centers: Vec<HzbTexel>,
    extents: Vec<HzbTexel>,
    num_bounds: u32,
    readbacks: VecDeque<HzbReadback>,
    mapped: Option<MappedResults>,
    valid_frame_number: u32,
}

impl HzbOcclusionTester {
    /// Creates a tester for a `size_x * size_y` bounds texture.
    ///
    /// # Errors
    ///
    /// [`OcclusionError::InvalidConfig`] unless both sizes are non-zero
    /// multiples of 8.
    pub fn new(size_x: u32, size_y: u32) -> OcclusionResult<Self> {
        if size_x == 0 || size_y == 0 || size_x % BLOCK_SIZE != 0 || size_y % BLOCK_SIZE != 0 {
            return Err(OcclusionError::InvalidConfig(format!(
                "hzb texture {size_x}x{size_y} must be non-zero multiples of {BLOCK_SIZE}"
            )));
        }
        let texels = (size_x * size_y) as usize;
        Ok(Self {
            size_x,
            size_y,
            centers: vec![HzbTexel::default(); texels],
            extents: vec![HzbTexel::default(); texels],
            num_bounds: 0,
            readbacks: VecDeque::new(),
            mapped: None,
            valid_frame_number: INVALID_FRAME_NUMBER,
        })
    }

    /// Volumes one submission can hold.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.size_x * self.size_y
    }

    /// Volumes added since the last submission.
    #[inline]
    #[must_use]
    pub const fn num_bounds(&self) -> u32 {
        self.num_bounds
    }

    /// Submissions whose results were not mapped yet.
    #[inline]
    #[must_use]
    pub fn pending_readbacks(&self) -> usize {
        self.readbacks.len()
    }

    /// Texel offset of volume `index` in the 8x8 block layout.
    fn texel_offset(&self, index: u32) -> usize {
        let blocks_x = self.size_x / BLOCK_SIZE;
        let block = index / BLOCK_TEXELS;
        let within = index % BLOCK_TEXELS;
        let x = (block % blocks_x) * BLOCK_SIZE + within % BLOCK_SIZE;
        let y = (block / blocks_x) * BLOCK_SIZE + within / BLOCK_SIZE;
        (x + y * self.size_x) as usize
    }

    /// Queues a volume for the next submission and returns its index, or
    /// `None` when the texture is full (treat the volume as visible).
    pub fn add_bounds(&mut self, center: Vec3, extent: Vec3) -> Option<u32> {
        if self.num_bounds >= self.capacity() {
            return None;
        }
        let index = self.num_bounds;
        let texel = self.texel_offset(index);
        self.centers[texel] = HzbTexel::new(center, 0.0);
        self.extents[texel] = HzbTexel::new(extent, 1.0);
        self.num_bounds += 1;
        Some(index)
    }

    /// Runs the test for every added volume and queues its readback,
    /// stamped with `frame`. Returns `false` when there was nothing to test.
    pub fn submit(&mut self, rhi: &mut dyn HzbRhi, frame: u32) -> bool {
        if self.num_bounds == 0 {
            return false;
        }
        let future = rhi.submit_hzb_test(HzbTestRequest {
            size_x: self.size_x,
            size_y: self.size_y,
            num_bounds: self.num_bounds,
            centers: &self.centers,
            extents: &self.extents,
        });
        tracing::trace!(frame, num_bounds = self.num_bounds, "hzb test submitted");
        self.readbacks.push_back(HzbReadback {
            future,
            frame: frame & FRAME_NUMBER_MASK,
        });

        for index in 0..self.num_bounds {
            let texel = self.texel_offset(index);
            self.centers[texel] = HzbTexel::default();
            self.extents[texel] = HzbTexel::default();
        }
        self.num_bounds = 0;
        true
    }

    /// Maps the oldest queued readback, blocking on its fence.
    pub fn map_results(&mut self) {
        match self.readbacks.pop_front() {
            Some(readback) => self.map_readback(readback),
            None => self.map_fallback(),
        }
    }

    /// Maps the newest readback submitted at or before `frame`, dropping
    /// older ones unread. Blocks on that readback's fence only.
    pub fn map_results_through(&mut self, frame: u32) {
        let frame = frame & FRAME_NUMBER_MASK;
        let mut newest: Option<HzbReadback> = None;
        while self.readbacks.front().is_some_and(|r| r.frame <= frame) {
            let next = self.readbacks.pop_front();
            if let Some(skipped) = std::mem::replace(&mut newest, next) {
                tracing::debug!(frame = skipped.frame, "hzb readback dropped unread");
            }
        }
        match newest {
            Some(readback) => self.map_readback(readback),
            None => self.map_fallback(),
        }
    }

    fn map_readback(&mut self, mut readback: HzbReadback) {
        match readback.future.wait() {
            Ok(bytes) => {
                self.mapped = Some(MappedResults::Data(bytes));
                self.set_valid_frame_number(readback.frame);
            }
            Err(FenceError::Abandoned | FenceError::Consumed) => {
                tracing::warn!(frame = readback.frame, "hzb readback fence lost, assuming visible");
                self.map_fallback();
            }
        }
    }

    fn map_fallback(&mut self) {
        self.mapped = Some(MappedResults::Fallback);
        self.set_invalid_frame_number();
    }

    /// True when volume `index` of the mapped frame may be visible.
    /// Unmapped, fallback and invalid-frame states always answer `true`.
    #[must_use]
    pub fn is_visible(&self, index: u32) -> bool {
        if self.is_invalid_frame() {
            return true;
        }
        match &self.mapped {
            Some(MappedResults::Data(bytes)) => {
                if index >= self.capacity() {
                    return true;
                }
                bytes.get(self.texel_offset(index)).map_or(true, |&b| b != 0)
            }
            Some(MappedResults::Fallback) => FALLBACK_RESULT != 0,
            None => true,
        }
    }

    /// Releases the mapped buffer.
    pub fn unmap_results(&mut self) {
        self.mapped = None;
    }

    /// True while results are mapped.
    #[inline]
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// True when the mapped data belongs to `frame`.
    #[must_use]
    pub fn is_valid_frame(&self, frame: u32) -> bool {
        !self.is_invalid_frame() && self.valid_frame_number == frame & FRAME_NUMBER_MASK
    }

    /// Marks the mapped data as belonging to `frame`.
    pub fn set_valid_frame_number(&mut self, frame: u32) {
        self.valid_frame_number = frame & FRAME_NUMBER_MASK;
    }

    /// True when no frame's results are trusted.
    #[inline]
    #[must_use]
    pub const fn is_invalid_frame(&self) -> bool {
        self.valid_frame_number == INVALID_FRAME_NUMBER
    }

    /// Stops trusting any mapped data.
    pub fn set_invalid_frame_number(&mut self) {
        self.valid_frame_number = INVALID_FRAME_NUMBER;
    }

    /// Drops pending bounds, queued readbacks and the mapping.
    pub fn reset(&mut self) {
        self.centers.fill(HzbTexel::default());
        self.extents.fill(HzbTexel::default());
        self.num_bounds = 0;
        self.readbacks.clear();
        self.mapped = None;
        self.set_invalid_frame_number();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessGpu, HeadlessGpuConfig};
    use std::thread;
    use std::time::Duration;

    fn gpu() -> HeadlessGpu {
        // Volumes right of x = 0 are visible.
        HeadlessGpu::new(HeadlessGpuConfig::default(), |b| u64::from(b.origin.x > 0.0))
    }

    #[test]
    fn test_rejects_unaligned_size() {
        assert!(HzbOcclusionTester::new(12, 8).is_err());
        assert!(HzbOcclusionTester::new(0, 8).is_err());
        assert!(HzbOcclusionTester::new(16, 8).is_ok());
    }

    #[test]
    fn test_block_swizzle() {
        let hzb = HzbOcclusionTester::new(16, 16).unwrap();
        assert_eq!(hzb.texel_offset(0), 0);
        assert_eq!(hzb.texel_offset(7), 7);
        // Second row of the first block.
        assert_eq!(hzb.texel_offset(8), 16);
        // First texel of the second block sits 8 texels to the right.
        assert_eq!(hzb.texel_offset(64), 8);
        // Third block starts the second block row.
        assert_eq!(hzb.texel_offset(128), 8 * 16);
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut hzb = HzbOcclusionTester::new(8, 8).unwrap();
        for i in 0..64 {
            assert_eq!(hzb.add_bounds(Vec3::ZERO, Vec3::ONE), Some(i));
        }
        assert_eq!(hzb.add_bounds(Vec3::ZERO, Vec3::ONE), None);
    }

    #[test]
    fn test_submit_map_is_visible() {
        let mut gpu = gpu();
        let mut hzb = HzbOcclusionTester::new(16, 16).unwrap();
        let hidden = hzb.add_bounds(Vec3::new(-5.0, 0.0, 0.0), Vec3::ONE).unwrap();
        let shown = hzb.add_bounds(Vec3::new(5.0, 0.0, 0.0), Vec3::ONE).unwrap();
        for _ in 0..70 {
            hzb.add_bounds(Vec3::new(-1.0, 0.0, 0.0), Vec3::ONE);
        }
        assert!(hzb.submit(&mut gpu, 3));
        assert_eq!(hzb.num_bounds(), 0);
        gpu.complete_frame();

        hzb.map_results();
        assert!(hzb.is_valid_frame(3));
        assert!(!hzb.is_visible(hidden));
        assert!(hzb.is_visible(shown));
        assert!(!hzb.is_visible(70));
        hzb.unmap_results();
        assert!(!hzb.is_mapped());
        assert!(hzb.is_visible(hidden));
    }

    #[test]
    fn test_map_blocks_until_fence_signals() {
        let mut gpu = gpu();
        let mut hzb = HzbOcclusionTester::new(8, 8).unwrap();
        let hidden = hzb.add_bounds(Vec3::new(-5.0, 0.0, 0.0), Vec3::ONE).unwrap();
        hzb.submit(&mut gpu, 0);

        let remote = gpu.clone();
        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.complete_frame();
        });
        hzb.map_results();
        completer.join().unwrap();

        assert!(hzb.is_valid_frame(0));
        assert!(!hzb.is_visible(hidden));
    }

    #[test]
    fn test_device_loss_serves_fallback() {
        let mut gpu = gpu();
        let mut hzb = HzbOcclusionTester::new(8, 8).unwrap();
        let hidden = hzb.add_bounds(Vec3::new(-5.0, 0.0, 0.0), Vec3::ONE).unwrap();
        hzb.submit(&mut gpu, 1);
        gpu.lose_device();

        hzb.map_results();
        assert!(hzb.is_invalid_frame());
        assert!(!hzb.is_valid_frame(1));
        assert!(hzb.is_visible(hidden));
        assert!(hzb.is_visible(63));
    }

    #[test]
    fn test_map_through_drops_older_readbacks() {
        let mut gpu = gpu();
        let mut hzb = HzbOcclusionTester::new(8, 8).unwrap();
        for frame in 0..3 {
            hzb.add_bounds(Vec3::new(5.0, 0.0, 0.0), Vec3::ONE);
            hzb.submit(&mut gpu, frame);
            gpu.complete_frame();
        }
        hzb.map_results_through(1);
        assert!(hzb.is_valid_frame(1));
        assert_eq!(hzb.pending_readbacks(), 1);

        hzb.unmap_results();
        hzb.map_results_through(1);
        assert!(hzb.is_invalid_frame());
    }

    #[test]
    fn test_frame_markers() {
        let mut hzb = HzbOcclusionTester::new(8, 8).unwrap();
        assert!(hzb.is_invalid_frame());
        hzb.set_valid_frame_number(0x8000_0005);
        assert!(hzb.is_valid_frame(5));
        assert!(!hzb.is_invalid_frame());
        hzb.set_invalid_frame_number();
        assert!(!hzb.is_valid_frame(5));
    }
}
