//! # Slot Pool
//!
//! Fixed-capacity generational pool for objects with an external lifetime,
//! such as native GPU queries.

use crate::error::{CoreError, CoreResult};

/// Handle to an object stored in a [`SlotPool`].
///
/// The generation makes handles to freed-and-reused slots detectably stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    index: u32,
    generation: u32,
}

impl PoolHandle {
    /// Slot index inside the pool.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the handle into a single `u64` (generation high, index low).
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`PoolHandle::to_bits`].
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generational pool of at most `capacity` live objects.
///
/// Insertion and removal are O(1). Storage is reserved up front and never
/// grows past the capacity.
///
/// # Thread Safety
///
/// Not thread-safe; wrap in a mutex when shared.
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
    capacity: usize,
}

impl<T> SlotPool<T> {
    /// Creates a pool holding at most `capacity` objects.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            live: 0,
            capacity,
        }
    }

    /// Maximum number of live objects.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live objects.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// True when no object is live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores `value`, failing with [`CoreError::PoolExhausted`] at capacity.
    pub fn try_insert(&mut self, value: T) -> CoreResult<PoolHandle> {
        if self.live >= self.capacity {
            return Err(CoreError::PoolExhausted {
                capacity: self.capacity,
            });
        }

        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
            (self.slots.len() - 1) as u32
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.live += 1;

        Ok(PoolHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Removes and returns the object behind `handle`.
    pub fn remove(&mut self, handle: PoolHandle) -> CoreResult<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
            .ok_or(CoreError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            })?;

        let value = slot.value.take().ok_or(CoreError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
        })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.live -= 1;
        Ok(value)
    }

    /// Shared access to a live object.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .value
            .as_ref()
    }

    /// Mutable access to a live object.
    #[inline]
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .value
            .as_mut()
    }

    /// True when `handle` names a live object.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: PoolHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Removes every object. Outstanding handles become stale.
    pub fn clear(&mut self) {
        self.free_list.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free_list.push(index as u32);
        }
        self.live = 0;
    }

    /// Iterates mutably over all live objects.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PoolHandle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.as_mut().map(|v| {
                (
                    PoolHandle {
                        index: index as u32,
                        generation,
                    },
                    v,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_insert_remove() {
        let mut pool: SlotPool<u32> = SlotPool::new(10);

        let h1 = pool.try_insert(42).unwrap();
        assert_eq!(*pool.get(h1).unwrap(), 42);
        assert_eq!(pool.len(), 1);

        assert_eq!(pool.remove(h1).unwrap(), 42);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pool_full() {
        let mut pool: SlotPool<u8> = SlotPool::new(2);

        let _ = pool.try_insert(1).unwrap();
        let _ = pool.try_insert(2).unwrap();
        assert_eq!(
            pool.try_insert(3),
            Err(CoreError::PoolExhausted { capacity: 2 })
        );
    }

    #[test]
    fn test_pool_reuse_bumps_generation() {
        let mut pool: SlotPool<u32> = SlotPool::new(1);

        let h1 = pool.try_insert(1).unwrap();
        pool.remove(h1).unwrap();

        let h2 = pool.try_insert(2).unwrap();
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.generation(), h2.generation());
        assert!(pool.get(h1).is_none());
        assert!(matches!(pool.remove(h1), Err(CoreError::StaleHandle { .. })));
        assert_eq!(*pool.get(h2).unwrap(), 2);
    }

    #[test]
    fn test_handle_bits() {
        let mut pool: SlotPool<u32> = SlotPool::new(4);
        let h = pool.try_insert(7).unwrap();
        assert_eq!(PoolHandle::from_bits(h.to_bits()), h);
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut pool: SlotPool<u32> = SlotPool::new(4);
        let h = pool.try_insert(7).unwrap();
        pool.clear();
        assert!(!pool.contains(h));
        assert!(pool.try_insert(8).is_ok());
    }
}
