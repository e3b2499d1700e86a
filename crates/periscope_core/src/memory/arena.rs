//! # Frame Arena
//!
//! Per-frame storage handed out as contiguous slices.
//! Cleared at the start of every frame; capacity is kept between frames.

/// Append-only storage rebuilt every frame.
///
/// # Example
///
/// ```rust
/// use periscope_core::FrameArena;
///
/// let mut arena = FrameArena::with_capacity(16);
/// arena.push(1.0_f32);
/// assert_eq!(arena.as_slice(), &[1.0]);
///
/// arena.reset();
/// assert!(arena.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct FrameArena<T> {
    items: Vec<T>,
    frame: u64,
}

impl<T> Default for FrameArena<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            frame: 0,
        }
    }
}

impl<T> FrameArena<T> {
    /// Creates an arena with room for `capacity` items.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            frame: 0,
        }
    }

    /// Appends an item.
    #[inline]
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Drops every item and starts a new frame.
    #[inline]
    pub fn reset(&mut self) {
        self.items.clear();
        self.frame += 1;
    }

    /// Number of resets so far.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Number of items this frame.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing was pushed this frame.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All items as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// All items as a mutable slice, for handing disjoint ranges to tasks.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items
    }

    /// Moves the items out, leaving the arena empty for the next frame.
    pub fn take(&mut self) -> Vec<T> {
        self.frame += 1;
        std::mem::take(&mut self.items)
    }
}

impl<T> Extend<T> for FrameArena<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}
