//! Pipeline error types.

use periscope_occlusion::OcclusionError;
use periscope_raytracing::RayTracingError;
use thiserror::Error;

/// Errors returned by the frame pipeline.
#[derive(Error, Debug)]
pub enum PeriscopeError {
    /// Occlusion side.
    #[error(transparent)]
    Occlusion(#[from] OcclusionError),

    /// Ray tracing side.
    #[error(transparent)]
    RayTracing(#[from] RayTracingError),

    /// Configuration text could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type PeriscopeResult<T> = Result<T, PeriscopeError>;
