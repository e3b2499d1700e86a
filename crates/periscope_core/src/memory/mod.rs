//! # Memory
//!
//! Per-frame arenas and fixed-capacity pools.

mod arena;
mod pool;

pub use arena::FrameArena;
pub use pool::{PoolHandle, SlotPool};
