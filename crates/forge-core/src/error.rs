//! Core error types.

use thiserror::Error;

/// Errors from the artifact store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Lookup of an unknown artifact name. Always a usage error, never retried.
    #[error("Artifact not found: {0}")]
    NotFound(String),
}

/// Errors from the project writer.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create a parent directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("Failed to write {path}: {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },
}
