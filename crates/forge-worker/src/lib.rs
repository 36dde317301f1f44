//! # forge-worker
//!
//! Isolated test execution for the forge engine.
//!
//! Generated tests never run inside the orchestrator's own process: a fresh
//! worker process is spawned per execution, readiness is detected from its
//! stdout protocol, and the test request travels over a loopback RPC call
//! with bounded exponential-backoff retry. The worker is always torn down
//! afterwards; at most one worker is alive per project at any time.
//!
//! - [`TestWorker`] - The execution trait the orchestrator depends on
//! - [`WorkerManager`] - Process-spawning implementation
//! - [`RequestHandler`] - Retry/backoff policy for the RPC call
//! - [`TestOutcome`] - Structured result, distinguishing transport,
//!   environment-setup and assertion failures

mod error;
mod outcome;
mod process;
mod rpc;
mod traits;

pub use error::WorkerError;
pub use outcome::{ConsoleOutput, FailureDetail, TestOutcome, TestRequest, TestResponse};
pub use process::{WorkerConfig, WorkerManager};
pub use rpc::RequestHandler;
pub use traits::TestWorker;
