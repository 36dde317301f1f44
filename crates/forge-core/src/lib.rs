//! # forge-core
//!
//! Core data model for the forge orchestration engine.
//!
//! This crate provides:
//! - [`Artifact`] - One generated source file, tracked by name, path and source
//! - [`ArtifactStore`] - Exclusive owner of artifacts with deterministic registration order
//! - [`DependencyGraph`] - Directed dependency graph with SCC analysis and deterministic
//!   processing order
//! - [`ProjectWriter`] - Mirrors artifact contents to an on-disk project layout
//!
//! The store owns artifacts; everything else holds lookup keys. The graph is
//! derived state, rebuilt from the store whenever dependency-aware grouping
//! is needed.

pub mod artifact;
pub mod error;
pub mod graph;
pub mod store;
pub mod writer;

pub use artifact::{base_of_upload, upload_counterpart, Artifact, ArtifactKind};
pub use error::{StoreError, WriteError};
pub use graph::{DependencyGraph, DependencySnapshot};
pub use store::ArtifactStore;
pub use writer::ProjectWriter;
