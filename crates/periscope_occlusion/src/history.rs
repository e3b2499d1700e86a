//! # Primitive Occlusion History
//!
//! Cross-frame memory of one occlusion-tested object. Each record keeps a
//! small ring with one pending test per buffered frame index:
//!
//! ```text
//!  frame F, B = 2          ring[F % 2]              awaiting_read
//!  AllocateQueries  ──►  take entry issued at F-2 ──►  (read this frame)
//!                         store entry issued at F
//! ```
//!
//! An entry is only ever read in the frame exactly `B` frames after its
//! issue frame; anything else is released unread.

use periscope_core::MAX_BUFFERED_FRAMES;

use crate::query_pool::QueryHandle;

const RING_LEN: usize = MAX_BUFFERED_FRAMES as usize;

/// Identifies a tested object: a primitive plus an optional sub-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PrimitiveOcclusionKey {
    /// Scene primitive id.
    pub primitive: u32,
    /// Sub-query index within the primitive (0 for the whole primitive).
    pub sub_query: u32,
}

impl PrimitiveOcclusionKey {
    /// Key for a whole primitive.
    #[inline]
    #[must_use]
    pub const fn new(primitive: u32) -> Self {
        Self {
            primitive,
            sub_query: 0,
        }
    }

    /// Key for a sub-query of a primitive.
    #[inline]
    #[must_use]
    pub const fn with_sub_query(primitive: u32, sub_query: u32) -> Self {
        Self { primitive, sub_query }
    }
}

/// The kind of test an entry is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTest {
    /// A pooled occlusion query. `grouped` queries answer for a whole batch.
    Query {
        /// Handle holding one reference for this record.
        handle: QueryHandle,
        /// True when the box shared its query with other primitives.
        grouped: bool,
    },
    /// A volume in the HZB test of the issue frame.
    Hzb {
        /// Volume index in that frame's HZB submission.
        index: u32,
    },
}

impl PendingTest {
    /// The pooled query this test holds, if any.
    #[inline]
    #[must_use]
    pub fn query_handle(self) -> Option<QueryHandle> {
        match self {
            Self::Query { handle, .. } if !handle.is_null() => Some(handle),
            _ => None,
        }
    }
}

/// A test tagged with the frame it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOcclusionTest {
    /// What to read.
    pub test: PendingTest,
    /// Issue frame.
    pub frame: u32,
}

/// Occlusion history of one object.
#[derive(Debug, Clone)]
pub struct PrimitiveOcclusionRecord {
    key: PrimitiveOcclusionKey,
    pending: [Option<PendingOcclusionTest>; RING_LEN],
    awaiting_read: Option<PendingOcclusionTest>,
    /// Time the object was last considered.
    pub last_considered_time: f64,
    /// Frame the object was last considered.
    pub last_considered_frame: u32,
    /// Frame a test was last issued, if ever.
    pub last_tested_frame: Option<u32>,
    /// Time the object was last proven visible by a definite result.
    pub last_proven_visible_time: f64,
    /// Outcome of the last resolved frame.
    pub was_occluded_last_frame: bool,
    /// True when the last outcome came from a per-object result.
    pub occlusion_state_was_definite_last_frame: bool,
    /// Screen fraction covered by the last visible result.
    pub last_pixel_fraction: f32,
    /// Frames left with the newly-tested bounds expansion.
    pub expansion_cooldown: u32,
    created_frame: u32,
}

impl PrimitiveOcclusionRecord {
    /// Starts a history at `frame`.
    #[must_use]
    pub fn new(key: PrimitiveOcclusionKey, frame: u32, time: f64) -> Self {
        Self {
            key,
            pending: [None; RING_LEN],
            awaiting_read: None,
            last_considered_time: time,
            last_considered_frame: frame,
            last_tested_frame: None,
            last_proven_visible_time: 0.0,
            was_occluded_last_frame: false,
            occlusion_state_was_definite_last_frame: false,
            last_pixel_fraction: 0.0,
            expansion_cooldown: 0,
            created_frame: frame,
        }
    }

    /// The object this history belongs to.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> PrimitiveOcclusionKey {
        self.key
    }

    /// True when the history was created in `frame`.
    #[inline]
    #[must_use]
    pub const fn is_new_in(&self, frame: u32) -> bool {
        self.created_frame == frame
    }

    /// Enters `frame`: the ring entry for this frame index becomes the entry
    /// awaiting its read. Returns an earlier awaiting entry that was never
    /// read so its query can be released.
    pub fn begin_frame(&mut self, frame: u32, buffered_frames: u32) -> Option<PendingOcclusionTest> {
        let slot = ring_slot(frame, buffered_frames);
        let unread = self.awaiting_read.take();
        self.awaiting_read = self.pending[slot].take();
        self.last_considered_frame = frame;
        unread
    }

    /// Stores the test issued in `frame`. Returns a displaced entry whose
    /// query must be released.
    pub fn store(
        &mut self,
        frame: u32,
        buffered_frames: u32,
        test: PendingTest,
    ) -> Option<PendingOcclusionTest> {
        self.last_tested_frame = Some(frame);
        self.pending[ring_slot(frame, buffered_frames)].replace(PendingOcclusionTest { test, frame })
    }

    /// Takes the entry awaiting its read.
    pub fn take_awaiting(&mut self) -> Option<PendingOcclusionTest> {
        self.awaiting_read.take()
    }

    /// True when any test is still held.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.awaiting_read.is_some() || self.pending.iter().any(Option::is_some)
    }

    /// Re-slots the ring for a new buffered frame count at `frame`.
    ///
    /// Entries that will still be read (issued at `f` with `f + new >= frame`)
    /// move to `f % new`; the rest are handed to `release`.
    pub fn migrate(
        &mut self,
        frame: u32,
        buffered_frames: u32,
        mut release: impl FnMut(PendingOcclusionTest),
    ) {
        let mut pending = [None; RING_LEN];
        for entry in self.pending.iter_mut().filter_map(Option::take) {
            if entry.frame.wrapping_add(buffered_frames) >= frame {
                let slot = ring_slot(entry.frame, buffered_frames);
                if let Some(displaced) = pending[slot].replace(entry) {
                    release(displaced);
                }
            } else {
                release(entry);
            }
        }
        self.pending = pending;
    }

    /// Hands every held test to `release`.
    pub fn release_all(&mut self, mut release: impl FnMut(PendingOcclusionTest)) {
        if let Some(entry) = self.awaiting_read.take() {
            release(entry);
        }
        for entry in self.pending.iter_mut().filter_map(Option::take) {
            release(entry);
        }
    }
}

#[inline]
fn ring_slot(frame: u32, buffered_frames: u32) -> usize {
    (frame % buffered_frames.clamp(1, MAX_BUFFERED_FRAMES)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hzb(index: u32) -> PendingTest {
        PendingTest::Hzb { index }
    }

    #[test]
    fn test_ring_returns_entry_b_frames_later() {
        let mut record = PrimitiveOcclusionRecord::new(PrimitiveOcclusionKey::new(1), 0, 0.0);
        for frame in 0..5 {
            assert!(record.begin_frame(frame, 2).is_none());
            let awaiting = record.take_awaiting();
            if frame >= 2 {
                assert_eq!(
                    awaiting,
                    Some(PendingOcclusionTest {
                        test: hzb(frame - 2),
                        frame: frame - 2
                    })
                );
            } else {
                assert!(awaiting.is_none());
            }
            assert!(record.store(frame, 2, hzb(frame)).is_none());
        }
    }

    #[test]
    fn test_unread_entry_is_returned() {
        let mut record = PrimitiveOcclusionRecord::new(PrimitiveOcclusionKey::new(1), 0, 0.0);
        record.begin_frame(0, 1);
        record.store(0, 1, hzb(7));
        record.begin_frame(1, 1);
        // Frame 1 never read; frame 2 hands it back.
        let unread = record.begin_frame(2, 1);
        assert_eq!(unread.map(|e| e.frame), Some(0));
    }

    #[test]
    fn test_migrate_shrink_keeps_readable_entries() {
        let mut record = PrimitiveOcclusionRecord::new(PrimitiveOcclusionKey::new(1), 0, 0.0);
        for frame in 0..4 {
            record.begin_frame(frame, 4);
            record.take_awaiting();
            record.store(frame, 4, hzb(frame));
        }

        let mut released = Vec::new();
        record.migrate(4, 2, |e| released.push(e.frame));
        released.sort_unstable();
        assert_eq!(released, vec![0, 1]);

        record.begin_frame(4, 2);
        assert_eq!(record.take_awaiting().map(|e| e.frame), Some(2));
        record.begin_frame(5, 2);
        assert_eq!(record.take_awaiting().map(|e| e.frame), Some(3));
    }

    #[test]
    fn test_migrate_grow_keeps_everything() {
        let mut record = PrimitiveOcclusionRecord::new(PrimitiveOcclusionKey::new(1), 0, 0.0);
        record.begin_frame(0, 1);
        record.store(0, 1, hzb(0));

        let mut released = 0;
        record.migrate(1, 3, |_| released += 1);
        assert_eq!(released, 0);
        assert!(record.has_pending());

        record.begin_frame(3, 3);
        assert_eq!(record.take_awaiting().map(|e| e.frame), Some(0));
    }

    #[test]
    fn test_release_all_empties_ring() {
        let mut record = PrimitiveOcclusionRecord::new(PrimitiveOcclusionKey::new(1), 0, 0.0);
        record.begin_frame(0, 2);
        record.store(0, 2, hzb(0));
        record.begin_frame(1, 2);
        record.store(1, 2, hzb(1));
        let mut count = 0;
        record.release_all(|_| count += 1);
        assert_eq!(count, 2);
        assert!(!record.has_pending());
    }

    #[test]
    fn test_null_query_has_no_handle() {
        let test = PendingTest::Query {
            handle: QueryHandle::NULL,
            grouped: false,
        };
        assert!(test.query_handle().is_none());
        assert!(hzb(0).query_handle().is_none());
    }
}
