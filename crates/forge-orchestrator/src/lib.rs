//! # forge-orchestrator
//!
//! Dependency-ordered generate/test/retry pipeline.
//!
//! The orchestrator walks the artifact dependency graph in
//! strongly-connected groups. For each group it generates a test through
//! the oracle, executes it in an isolated worker process and, on failure,
//! runs a bounded reflect-and-regenerate loop before retrying. Completed
//! groups are checkpointed; progress streams over a bounded channel ending
//! with a `DONE` sentinel.
//!
//! - [`Orchestrator`] - Top-level pipeline driver
//! - [`RetryController`] - Per-group execute/reflect/regenerate loop
//! - [`ReflectionEngine`] - Analyze-then-regenerate repair calls
//! - [`CheckpointManager`] - Append-only checkpoint sequence
//! - [`ProgressEvent`] - Streamed status events

mod checkpoint;
mod error;
mod orchestrator;
mod progress;
mod reflection;
mod retry;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use error::OrchestratorError;
pub use orchestrator::{
    ExhaustedGroup, GroupSummary, Orchestrator, OrchestratorConfig, PipelineResult, TestGroup,
};
pub use progress::{progress_channel, ProgressEvent, ProgressSender};
pub use reflection::{FailureContext, ReflectionEngine};
pub use retry::{GroupReport, GroupRunContext, GroupState, RetryController};
