//! Orchestrator error types.

use thiserror::Error;

/// Errors surfaced by the pipeline.
///
/// Group-level test failures are not errors; they travel inside
/// [`crate::checkpoint::Checkpoint`] and the pipeline result. An `Err` here
/// means the pipeline itself could not proceed for an artifact (oracle
/// failure, store miss) or the caller asked for something that does not
/// exist.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error(transparent)]
    Store(#[from] forge_core::StoreError),

    #[error(transparent)]
    Oracle(#[from] forge_oracle::OracleError),

    #[error(transparent)]
    Worker(#[from] forge_worker::WorkerError),

    #[error(transparent)]
    Write(#[from] forge_core::WriteError),
}
