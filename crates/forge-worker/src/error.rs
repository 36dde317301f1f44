//! Worker error types.

use thiserror::Error;

/// Errors that can occur while driving an isolated worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    /// RPC connection to the worker failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Test execution timed out.
    #[error("Test execution timed out")]
    Timeout,

    /// Worker response did not match the expected shape.
    #[error("Invalid worker response: {0}")]
    InvalidResponse(String),
}
