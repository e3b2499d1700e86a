//! # Core Error Types
//!
//! Errors shared by every GPU-facing component. None of these are fatal for
//! a frame: callers convert them into conservative fallbacks.

use thiserror::Error;

/// Errors raised by the render hardware interface collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RhiError {
    /// The native occlusion query heap is exhausted.
    #[error("occlusion query heap exhausted ({capacity} queries live)")]
    QueryExhausted {
        /// Number of queries the backend can hold.
        capacity: usize,
    },

    /// The dynamic vertex buffer cannot hold the requested allocation.
    #[error("dynamic vertex buffer full: requested {requested} bytes, {available} available")]
    VertexBufferFull {
        /// Bytes requested.
        requested: usize,
        /// Bytes left.
        available: usize,
    },

    /// The query handle does not name a live native query.
    #[error("unknown native query {0}")]
    UnknownQuery(u64),

    /// The device was removed or lost; outstanding GPU work will never complete.
    #[error("device lost")]
    DeviceLost,
}

/// Errors returned when waiting on a GPU fence.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceError {
    /// The producing side was dropped before signalling (device loss, teardown).
    #[error("fence abandoned before it was signalled")]
    Abandoned,

    /// The value was already taken by an earlier `wait`.
    #[error("fence value already consumed")]
    Consumed,
}

/// Errors from core containers and configuration checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A fixed-capacity pool has no free slot left.
    #[error("pool exhausted: capacity {capacity}")]
    PoolExhausted {
        /// Pool capacity.
        capacity: usize,
    },

    /// A handle refers to a slot that was freed and reused.
    #[error("stale pool handle: slot {index} generation {generation}")]
    StaleHandle {
        /// Slot index.
        index: u32,
        /// Generation carried by the handle.
        generation: u32,
    },

    /// A tunable is outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
