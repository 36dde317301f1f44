//! Progress event stream.
//!
//! One bounded channel, owned by the orchestrator and handed to whichever
//! transport wants to read it. The stream is append-only and terminated by
//! the [`ProgressEvent::Done`] sentinel, which renders as `DONE`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Human-readable pipeline status events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    GroupStarted {
        members: Vec<String>,
    },
    /// A generated test file was written to the project layout.
    TestWritten {
        path: String,
    },
    AttemptFailed {
        members: Vec<String>,
        attempt: u32,
        diagnostic: String,
    },
    GroupCompleted {
        members: Vec<String>,
        success: bool,
    },
    /// The generation call itself failed for a group; the pipeline moves on.
    OracleFailed {
        members: Vec<String>,
        message: String,
    },
    /// End-of-stream sentinel.
    Done,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupStarted { members } => {
                write!(f, "Processing group [{}]", members.join(", "))
            }
            Self::TestWritten { path } => write!(f, "Test written: {path}"),
            Self::AttemptFailed {
                members,
                attempt,
                diagnostic,
            } => write!(
                f,
                "Attempt {attempt} failed for [{}]: {diagnostic}",
                members.join(", ")
            ),
            Self::GroupCompleted { members, success } => {
                let status = if *success { "passed" } else { "exhausted" };
                write!(f, "Group [{}] {status}", members.join(", "))
            }
            Self::OracleFailed { members, message } => {
                write!(f, "Generation failed for [{}]: {message}", members.join(", "))
            }
            Self::Done => write!(f, "DONE"),
        }
    }
}

/// Sending half of the progress stream.
///
/// A dropped receiver never fails the pipeline; events are discarded.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSender {
    pub async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Progress receiver dropped, event discarded");
        }
    }
}

/// Create a bounded progress channel.
#[must_use]
pub fn progress_channel(capacity: usize) -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ProgressSender { tx }, rx)
}
