//! Test execution trait.

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::outcome::TestOutcome;

/// Executes one test file against a project in isolation.
///
/// [`WorkerManager`](crate::WorkerManager) is the process-spawning
/// implementation; retry-loop tests use scripted mocks.
#[async_trait]
pub trait TestWorker: Send + Sync {
    /// Run the named test file for the project and return its outcome.
    ///
    /// Transport-level problems (spawn failure, connection failure after
    /// retries, timeout) come back as a failed [`TestOutcome`], not as an
    /// `Err`; `Err` is reserved for misconfiguration.
    async fn execute_test(
        &self,
        test_file_name: &str,
        project_name: &str,
    ) -> Result<TestOutcome, WorkerError>;
}

/// Pass-through for boxed workers, so generic callers accept trait objects.
#[async_trait]
impl TestWorker for Box<dyn TestWorker> {
    async fn execute_test(
        &self,
        test_file_name: &str,
        project_name: &str,
    ) -> Result<TestOutcome, WorkerError> {
        (**self).execute_test(test_file_name, project_name).await
    }
}
