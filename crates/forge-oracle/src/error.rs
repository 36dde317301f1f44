//! Oracle error types.

use thiserror::Error;

/// Errors from the generation oracle.
///
/// Oracle failures are not retried by the engine; they surface as a
/// pipeline-level failure for the artifact being generated.
#[derive(Error, Debug)]
pub enum OracleError {
    /// The underlying provider call failed.
    #[error("Generation call failed: {0}")]
    CallFailed(String),

    /// The provider returned nothing.
    #[error("Empty response from oracle")]
    EmptyResponse,

    /// The response could not be split into artifacts.
    #[error("Unparseable oracle response: {0}")]
    Unparseable(String),

    /// Configuration error.
    #[error("Oracle configuration error: {0}")]
    ConfigError(String),
}
