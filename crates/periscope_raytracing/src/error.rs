//! # Ray Tracing Error Types
//!
//! Geometry that is not ready and lost update fences are not errors: the
//! first is force-built, the second is logged and the build proceeds.

use periscope_core::{CoreError, FenceError};
use thiserror::Error;

/// Errors returned by the ray tracing crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RayTracingError {
    /// A tunable is outside its accepted range.
    #[error("invalid ray tracing configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed.
    #[error("failed to parse ray tracing configuration: {0}")]
    ConfigParse(String),

    /// The acceleration structure builder rejected the instance list.
    #[error("acceleration structure build failed: {0}")]
    BuildFailed(String),

    /// A fence was consumed twice.
    #[error(transparent)]
    Fence(#[from] FenceError),

    /// Error bubbled up from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for ray tracing operations.
pub type RayTracingResult<T> = Result<T, RayTracingError>;
