//! Error types for render tasks and the dispatcher

use thiserror::Error;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can be attached to a render task
///
/// None of these escape the task boundary: they are delivered to the caller
/// through [`RenderOutput::error`](crate::RenderOutput) alongside whatever
/// partial result is available.
#[derive(Error, Debug)]
pub enum Error {
    /// The engine was reclaimed (or the dispatcher dropped) before the task could use it
    #[error("Engine unavailable")]
    EngineUnavailable,

    /// The engine reported a load error
    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    /// Script execution raised or returned an engine-level error
    #[error("Script evaluation failed: {0}")]
    EvaluationFailed(String),

    /// A `Validate` post-action never became truthy
    #[error("Validation did not succeed within {0}ms")]
    ValidationTimeout(u64),

    /// The captured document could not be turned into bytes
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// No done signal arrived in time
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Failed to set up the dispatcher or engine
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),
}

impl Error {
    /// Whether a result delivered alongside this error is still usable as
    /// best-effort content.
    pub fn is_partial(&self) -> bool {
        matches!(self, Error::ValidationTimeout(_))
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
