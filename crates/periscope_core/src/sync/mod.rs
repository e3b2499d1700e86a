//! # GPU Synchronization
//!
//! One-shot fences between the CPU and GPU timelines.
//!
//! ```text
//! Render thread:   submit work ──► GpuPromise (held by backend)
//!                                      │
//!                                      ▼ signal(value)
//! Consumer:        GpuFuture::poll()   → Pending / Signalled / Abandoned
//!                  GpuFuture::wait()   → blocks until signal or drop
//! ```
//!
//! Only `wait` may block. A promise dropped without signalling models
//! device loss: the future reports `FenceError::Abandoned` instead of hanging.

mod fence;

pub use fence::{gpu_fence, FenceStatus, GpuFuture, GpuPromise};
