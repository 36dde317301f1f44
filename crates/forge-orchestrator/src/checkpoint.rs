//! Checkpoints.
//!
//! One immutable checkpoint per completed (passed or exhausted) test group,
//! held in an append-only sequence plus an id-keyed lookup map. Ids are
//! derived from the checkpoint ordinal and the sorted member names, so they
//! are stable for a fixed processing order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use forge_core::DependencySnapshot;
use forge_worker::TestOutcome;

use crate::error::OrchestratorError;

/// Immutable record of one test group's processing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    /// Member set, order-independent identity (stored sorted).
    pub group_members: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: TestOutcome,
    pub dependency_snapshot: DependencySnapshot,
}

/// Append-only checkpoint sequence with id lookup.
#[derive(Debug, Default)]
pub struct CheckpointManager {
    order: Vec<String>,
    by_id: HashMap<String, Checkpoint>,
}

impl CheckpointManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a checkpoint and return its id.
    pub fn save(
        &mut self,
        group_members: &[String],
        outcome: TestOutcome,
        dependency_snapshot: DependencySnapshot,
    ) -> String {
        let mut members: Vec<String> = group_members.to_vec();
        members.sort();
        let id = format!("checkpoint_{}_{}", self.order.len(), members.join("-"));

        let checkpoint = Checkpoint {
            id: id.clone(),
            group_members: members,
            timestamp: Utc::now(),
            outcome,
            dependency_snapshot,
        };
        info!(checkpoint = %id, success = checkpoint.outcome.success, "Checkpoint saved");

        self.order.push(id.clone());
        self.by_id.insert(id.clone(), checkpoint);
        id
    }

    /// Read-only retrieval by id.
    pub fn restore(&self, id: &str) -> Result<&Checkpoint, OrchestratorError> {
        self.by_id
            .get(id)
            .ok_or_else(|| OrchestratorError::CheckpointNotFound(id.to_string()))
    }

    /// Checkpoint ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
