//! # Occlusion Error Types
//!
//! GPU failures never show up here: they degrade to "visible" and are only
//! counted. These errors are caller mistakes.

use periscope_core::CoreError;
use thiserror::Error;

use crate::orchestrator::OcclusionPhase;

/// Errors returned by the occlusion crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcclusionError {
    /// A frame phase was called out of order.
    #[error("occlusion phase out of order: at {current:?}, called {requested:?}")]
    PhaseOrder {
        /// Phase the frame is in.
        current: OcclusionPhase,
        /// Phase the caller tried to run.
        requested: OcclusionPhase,
    },

    /// A tunable is outside its accepted range.
    #[error("invalid occlusion configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed.
    #[error("failed to parse occlusion configuration: {0}")]
    ConfigParse(String),

    /// Error bubbled up from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for occlusion operations.
pub type OcclusionResult<T> = Result<T, OcclusionError>;
