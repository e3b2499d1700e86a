//! # Frame Query Pool
//!
//! Recycles native occlusion queries across a ring of buffered frames.
//!
//! ```text
//!              slot 0        slot 1        slot 2        (B = 3)
//!            ┌────────┐    ┌────────┐    ┌────────┐
//!  free      │ q q q  │    │ q      │    │        │
//!  returned  │ q      │    │ q q    │    │ q q q  │
//!            └────────┘    └────────┘    └────────┘
//!               ▲ current = frame % B
//! ```
//!
//! A query released at frame F lands on the current slot's returned list.
//! When the ring comes back to that slot (F + B) the GPU has had B frames
//! to finish with it and it becomes free again. If the current slot runs
//! dry, free queries and then completed returned queries are taken from
//! the other slots oldest-first before a new native query is created.

use crate::rhi::{NativeQuery, OcclusionRhi};

/// Pool-issued handle to a query. Reference counted inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueryHandle(u32);

impl QueryHandle {
    /// The null handle: no query, treat the primitive as visible.
    pub const NULL: Self = Self(0);

    /// True for [`QueryHandle::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    #[inline]
    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

/// Lifecycle of a pooled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// On a free list, ready to hand out.
    Free,
    /// Handed out at `frame`; at least one reference is live.
    Pending {
        /// Frame the query was allocated in.
        frame: u32,
    },
    /// Released at `frame`; waiting for its buffered window to elapse.
    Ready {
        /// Frame the last reference was dropped in.
        frame: u32,
    },
}

/// Outcome of reading a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryReadback {
    /// Number of samples that passed the depth test.
    Samples(u64),
    /// The GPU has not produced the result yet.
    NotReady,
    /// Null handle or backend failure.
    Failed,
}

#[derive(Debug)]
struct PooledQuery {
    native: NativeQuery,
    state: SlotState,
    refs: u32,
}

#[derive(Debug, Default)]
struct FrameSlot {
    free: Vec<u32>,
    returned: Vec<u32>,
}

/// Buffered pool of native occlusion queries for one view.
#[derive(Debug)]
pub struct FrameQueryPool {
    entries: Vec<PooledQuery>,
    slots: Vec<FrameSlot>,
    current: usize,
    frame: u32,
    buffered_frames: u32,
    allocation_failures: u64,
    scavenged: u64,
}

impl FrameQueryPool {
    /// Creates an empty pool with `buffered_frames` slots.
    #[must_use]
    pub fn new(buffered_frames: u32) -> Self {
        let buffered_frames = buffered_frames.max(1);
        Self {
            entries: Vec::new(),
            slots: (0..buffered_frames).map(|_| FrameSlot::default()).collect(),
            current: 0,
            frame: 0,
            buffered_frames,
            allocation_failures: 0,
            scavenged: 0,
        }
    }

    /// Number of slots in the ring.
    #[inline]
    #[must_use]
    pub const fn buffered_frames(&self) -> u32 {
        self.buffered_frames
    }

    /// Index of the slot for the current frame.
    #[inline]
    #[must_use]
    pub const fn current_slot(&self) -> usize {
        self.current
    }

    /// Frame passed to the last [`FrameQueryPool::advance_frame`].
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u32 {
        self.frame
    }

    /// Enters the slot for `frame`, resizing the ring first if the buffered
    /// frame count changed.
    pub fn advance_frame(&mut self, frame: u32, buffered_frames: u32) {
        let buffered_frames = buffered_frames.max(1);
        if buffered_frames != self.buffered_frames {
            self.resize(frame, buffered_frames);
        }

        self.frame = frame;
        self.current = (frame % self.buffered_frames) as usize;

        let window = self.buffered_frames;
        let FrameSlot { free, returned } = &mut self.slots[self.current];
        let entries = &mut self.entries;
        returned.retain(|&index| {
            let entry = &mut entries[index as usize];
            let expired = match entry.state {
                SlotState::Ready { frame: released } => frame.wrapping_sub(released) >= window,
                _ => false,
            };
            if expired {
                entry.state = SlotState::Free;
                free.push(index);
            }
            !expired
        });
    }

    fn resize(&mut self, frame: u32, buffered_frames: u32) {
        tracing::debug!(
            from = self.buffered_frames,
            to = buffered_frames,
            "query pool ring resized"
        );
        let current = (frame % buffered_frames) as usize;
        let mut slots: Vec<FrameSlot> = (0..buffered_frames).map(|_| FrameSlot::default()).collect();
        for (index, entry) in self.entries.iter().enumerate() {
            let index = index as u32;
            match entry.state {
                SlotState::Free => slots[current].free.push(index),
                SlotState::Ready { frame: released } => {
                    slots[(released % buffered_frames) as usize].returned.push(index);
                }
                SlotState::Pending { .. } => {}
            }
        }
        self.slots = slots;
        self.buffered_frames = buffered_frames;
    }

    /// Hands out a query with one reference, or [`QueryHandle::NULL`] when
    /// the pool is dry and the backend cannot create another.
    pub fn allocate_query(&mut self, rhi: &mut dyn OcclusionRhi) -> QueryHandle {
        let index = self.slots[self.current]
            .free
            .pop()
            .or_else(|| self.take_free_elsewhere())
            .or_else(|| self.scavenge(rhi));

        let index = match index {
            Some(index) => index as usize,
            None => match rhi.create_query() {
                Ok(native) => {
                    self.entries.push(PooledQuery {
                        native,
                        state: SlotState::Free,
                        refs: 0,
                    });
                    self.entries.len() - 1
                }
                Err(err) => {
                    self.allocation_failures += 1;
                    tracing::warn!(
                        error = %err,
                        live = self.entries.len(),
                        "occlusion query allocation failed, assuming visible"
                    );
                    return QueryHandle::NULL;
                }
            },
        };

        let entry = &mut self.entries[index];
        entry.state = SlotState::Pending { frame: self.frame };
        entry.refs = 1;
        QueryHandle::from_index(index)
    }

    /// Takes a free query parked in another slot, oldest slot first.
    fn take_free_elsewhere(&mut self) -> Option<u32> {
        let count = self.slots.len();
        (1..count).find_map(|step| self.slots[(self.current + step) % count].free.pop())
    }

    /// Steals a completed returned query from the non-current slots,
    /// starting with the oldest one.
    fn scavenge(&mut self, rhi: &dyn OcclusionRhi) -> Option<u32> {
        let count = self.slots.len();
        for step in 1..count {
            let slot = (self.current + step) % count;
            let position = self.slots[slot]
                .returned
                .iter()
                .position(|&index| rhi.is_query_complete(self.entries[index as usize].native));
            if let Some(position) = position {
                self.scavenged += 1;
                return Some(self.slots[slot].returned.remove(position));
            }
        }
        None
    }

    /// Adds a reference to a live handle.
    pub fn add_ref(&mut self, handle: QueryHandle) {
        if let Some(entry) = self.live_entry_mut(handle) {
            entry.refs += 1;
        }
    }

    /// Drops a reference; the last one returns the query to the current slot.
    pub fn release(&mut self, handle: QueryHandle) {
        let Some(index) = handle.index() else {
            return;
        };
        let Some(entry) = self.entries.get_mut(index) else {
            return;
        };
        if entry.refs == 0 {
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            entry.state = SlotState::Ready { frame: self.frame };
            self.slots[self.current].returned.push(index as u32);
        }
    }

    fn live_entry_mut(&mut self, handle: QueryHandle) -> Option<&mut PooledQuery> {
        let entry = self.entries.get_mut(handle.index()?)?;
        (entry.refs > 0).then_some(entry)
    }

    /// Native query behind a live handle.
    #[must_use]
    pub fn native(&self, handle: QueryHandle) -> Option<NativeQuery> {
        let entry = self.entries.get(handle.index()?)?;
        (entry.refs > 0).then_some(entry.native)
    }

    /// State of the query behind `handle`.
    #[must_use]
    pub fn state(&self, handle: QueryHandle) -> Option<SlotState> {
        Some(self.entries.get(handle.index()?)?.state)
    }

    /// Reads a live handle's result; never blocks unless `wait` is set.
    pub fn read_result(
        &self,
        rhi: &mut dyn OcclusionRhi,
        handle: QueryHandle,
        wait: bool,
    ) -> QueryReadback {
        let Some(native) = self.native(handle) else {
            return QueryReadback::Failed;
        };
        match rhi.query_result(native, wait) {
            Ok(Some(samples)) => QueryReadback::Samples(samples),
            Ok(None) => QueryReadback::NotReady,
            Err(err) => {
                tracing::debug!(error = %err, "occlusion query read failed");
                QueryReadback::Failed
            }
        }
    }

    /// Queries that can be handed out without creating a native one
    /// (free plus returned).
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.free.len() + slot.returned.len())
            .sum()
    }

    /// Queries with at least one live reference.
    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.entries.iter().filter(|e| e.refs > 0).count()
    }

    /// Every native query the pool owns.
    #[inline]
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.entries.len()
    }

    /// Allocations that came back null since creation.
    #[inline]
    #[must_use]
    pub const fn allocation_failures(&self) -> u64 {
        self.allocation_failures
    }

    /// Queries taken from other slots since creation.
    #[inline]
    #[must_use]
    pub const fn scavenged_count(&self) -> u64 {
        self.scavenged
    }

    /// Destroys every native query. Outstanding handles become dangling and
    /// must be dropped by their holders.
    pub fn release_all(&mut self, rhi: &mut dyn OcclusionRhi) {
        let outstanding = self.outstanding_count();
        if outstanding > 0 {
            tracing::debug!(outstanding, "releasing query pool with live handles");
        }
        for entry in self.entries.drain(..) {
            rhi.release_query(entry.native);
        }
        for slot in &mut self.slots {
            slot.free.clear();
            slot.returned.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessGpu, HeadlessGpuConfig};

    fn gpu(capacity: usize) -> HeadlessGpu {
        HeadlessGpu::new(
            HeadlessGpuConfig {
                query_capacity: capacity,
                ..HeadlessGpuConfig::default()
            },
            |_| 1,
        )
    }

    #[test]
    fn test_null_handle() {
        assert!(QueryHandle::NULL.is_null());
        assert!(QueryHandle::default().is_null());
        assert!(!QueryHandle::from_index(0).is_null());
    }

    #[test]
    fn test_released_query_recycled_after_window() {
        let mut gpu = gpu(16);
        let mut pool = FrameQueryPool::new(2);

        pool.advance_frame(0, 2);
        let q = pool.allocate_query(&mut gpu);
        assert_eq!(pool.state(q), Some(SlotState::Pending { frame: 0 }));
        pool.release(q);
        assert_eq!(pool.state(q), Some(SlotState::Ready { frame: 0 }));

        pool.advance_frame(1, 2);
        assert_eq!(pool.state(q), Some(SlotState::Ready { frame: 0 }));

        pool.advance_frame(2, 2);
        assert_eq!(pool.state(q), Some(SlotState::Free));
        let again = pool.allocate_query(&mut gpu);
        assert_eq!(again, q);
        assert_eq!(pool.total_count(), 1);
    }

    #[test]
    fn test_refcount_keeps_query_pending() {
        let mut gpu = gpu(16);
        let mut pool = FrameQueryPool::new(1);
        pool.advance_frame(0, 1);

        let q = pool.allocate_query(&mut gpu);
        pool.add_ref(q);
        pool.release(q);
        assert_eq!(pool.outstanding_count(), 1);
        pool.release(q);
        assert_eq!(pool.outstanding_count(), 0);
        assert!(pool.native(q).is_none());
    }

    #[test]
    fn test_scavenges_completed_oldest_first() {
        let mut gpu = gpu(2);
        let mut pool = FrameQueryPool::new(3);

        pool.advance_frame(0, 3);
        let a = pool.allocate_query(&mut gpu);
        let b = pool.allocate_query(&mut gpu);
        pool.release(a);
        pool.advance_frame(1, 3);
        pool.release(b);

        // Frame 2: own slot is empty; slot 0 (frame 0) is older than slot 1.
        pool.advance_frame(2, 3);
        let stolen = pool.allocate_query(&mut gpu);
        assert_eq!(stolen, a);
        assert_eq!(pool.scavenged_count(), 1);
        assert_eq!(pool.total_count(), 2);
    }

    #[test]
    fn test_free_queries_in_other_slots_are_reused() {
        let mut gpu = gpu(2);
        let mut pool = FrameQueryPool::new(2);

        pool.advance_frame(0, 2);
        let a = pool.allocate_query(&mut gpu);
        let b = pool.allocate_query(&mut gpu);
        pool.release(a);
        pool.release(b);

        pool.advance_frame(1, 2);
        // Both become free in slot 0.
        pool.advance_frame(2, 2);
        assert_eq!(pool.state(a), Some(SlotState::Free));
        assert_eq!(pool.state(b), Some(SlotState::Free));

        // Slot 1 is current and empty; the backend is at capacity.
        pool.advance_frame(3, 2);
        let reused = pool.allocate_query(&mut gpu);
        assert!(!reused.is_null());
        assert!(reused == a || reused == b);
        assert_eq!(pool.allocation_failures(), 0);
        assert_eq!(pool.scavenged_count(), 0);
        assert_eq!(pool.total_count(), 2);
    }

    #[test]
    fn test_exhausted_returns_null() {
        let mut gpu = gpu(1);
        let mut pool = FrameQueryPool::new(2);
        pool.advance_frame(0, 2);

        let first = pool.allocate_query(&mut gpu);
        assert!(!first.is_null());
        let second = pool.allocate_query(&mut gpu);
        assert!(second.is_null());
        assert_eq!(pool.allocation_failures(), 1);
        assert_eq!(pool.read_result(&mut gpu, second, false), QueryReadback::Failed);
    }

    #[test]
    fn test_allocate_release_idempotent_in_steady_state() {
        let mut gpu = gpu(16);
        let mut pool = FrameQueryPool::new(3);

        let mut counts = Vec::new();
        for frame in 0..10 {
            pool.advance_frame(frame, 3);
            let q = pool.allocate_query(&mut gpu);
            pool.release(q);
            counts.push(pool.available_count());
        }
        assert_eq!(counts[8], counts[9]);
        // Never drawn, so the backend reports it complete and it is reused.
        assert_eq!(pool.total_count(), 1);
    }

    #[test]
    fn test_resize_reslots_by_frame() {
        let mut gpu = gpu(16);
        let mut pool = FrameQueryPool::new(4);

        for frame in 0..4 {
            pool.advance_frame(frame, 4);
            let q = pool.allocate_query(&mut gpu);
            pool.release(q);
        }
        let before = pool.available_count();

        pool.advance_frame(4, 2);
        assert_eq!(pool.buffered_frames(), 2);
        assert_eq!(pool.available_count(), before);
        assert_eq!(pool.current_slot(), 0);
    }

    #[test]
    fn test_release_all() {
        let mut gpu = gpu(16);
        let mut pool = FrameQueryPool::new(2);
        pool.advance_frame(0, 2);
        let _ = pool.allocate_query(&mut gpu);
        let q = pool.allocate_query(&mut gpu);
        pool.release(q);

        pool.release_all(&mut gpu);
        assert_eq!(pool.total_count(), 0);
        assert_eq!(pool.available_count(), 0);
        assert_eq!(gpu.live_queries(), 0);
    }
}
