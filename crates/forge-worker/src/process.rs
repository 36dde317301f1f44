//! Worker process lifecycle.
//!
//! One isolated worker per project, stop-then-restart: any previously
//! running worker is terminated before a new one is spawned, and the worker
//! is always torn down after the test completes or the retry budget runs
//! out. The worker owns the project's test database for its lifetime, so no
//! further locking is needed.
//!
//! # Readiness protocol
//!
//! The worker performs its environment setup (schema migration) and then
//! reports on stdout, one JSON object per line:
//!
//! - `{"status": "ready"}` - setup finished, RPC endpoint serving
//! - `{"status": "error", "is_migration_setup_error": true, "exit": {...}}` -
//!   fatal setup failure; the `exit` payload is surfaced verbatim and the
//!   RPC call is never issued
//!
//! Liveness is polled at a short fixed interval (100ms). After readiness a
//! warm-up delay is honored before the RPC request, because the serving
//! stack needs time to finish initializing after the process reports alive.

use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::error::WorkerError;
use crate::outcome::{TestOutcome, TestRequest, TestResponse};
use crate::rpc::RequestHandler;
use crate::traits::TestWorker;

/// Configuration for the worker process and its RPC channel.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker executable.
    pub command: String,
    /// Arguments passed to the worker.
    pub args: Vec<String>,
    /// Fixed loopback port the worker serves its RPC endpoint on.
    pub port: u16,
    /// Liveness/readiness poll interval.
    pub poll_interval: Duration,
    /// Budget for the worker to report ready.
    pub ready_timeout: Duration,
    /// Delay between readiness and the RPC request.
    pub warmup_delay: Duration,
    /// Budget for one test-execution request.
    pub request_timeout: Duration,
    /// Retry policy for the RPC call.
    pub handler: RequestHandler,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "forge_worker".to_string()],
            port: 8765,
            poll_interval: Duration::from_millis(100),
            ready_timeout: Duration::from_secs(60),
            warmup_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            handler: RequestHandler::default(),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_warmup_delay(mut self, delay: Duration) -> Self {
        self.warmup_delay = delay;
        self
    }

    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: RequestHandler) -> Self {
        self.handler = handler;
        self
    }
}

/// What the readiness poll concluded.
enum Readiness {
    Ready,
    SetupError(Value),
    Exited(String),
    TimedOut,
}

/// Spawns and drives the isolated worker process.
pub struct WorkerManager {
    config: WorkerConfig,
    client: Client,
    current: Mutex<Option<Child>>,
}

impl WorkerManager {
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            current: Mutex::new(None),
        }
    }

    /// Terminate the current worker, if any.
    pub async fn stop(&self) {
        let mut guard = self.current.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(err) = child.kill().await {
                warn!(%err, "Failed to kill worker process");
            } else {
                debug!("Worker process terminated");
            }
        }
    }

    /// Spawn a fresh worker and register it as current.
    ///
    /// Returns a receiver of the worker's stdout lines and a shared buffer
    /// of its stderr lines.
    async fn spawn_worker(
        &self,
        project_name: &str,
    ) -> Result<(mpsc::UnboundedReceiver<String>, Arc<StdMutex<Vec<String>>>), WorkerError> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .env("FORGE_PROJECT", project_name)
            .env("FORGE_WORKER_PORT", self.config.port.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stdout_tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        let stderr_buf = Arc::new(StdMutex::new(Vec::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut lock) = buf.lock() {
                        lock.push(line);
                    }
                }
            });
        }

        *self.current.lock().await = Some(child);
        Ok((stdout_rx, stderr_buf))
    }

    /// Poll until the worker reports ready or fails setup.
    async fn wait_ready(
        &self,
        stdout_rx: &mut mpsc::UnboundedReceiver<String>,
        stderr_buf: &Arc<StdMutex<Vec<String>>>,
    ) -> Readiness {
        let deadline = Instant::now() + self.config.ready_timeout;

        loop {
            while let Ok(line) = stdout_rx.try_recv() {
                let Ok(value) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if value.get("status").and_then(Value::as_str) == Some("ready") {
                    return Readiness::Ready;
                }
                let setup_error = value
                    .get("is_migration_setup_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    || value.get("status").and_then(Value::as_str) == Some("error");
                if setup_error {
                    let payload = value.get("exit").cloned().unwrap_or(value);
                    return Readiness::SetupError(payload);
                }
            }

            let exited = {
                let mut guard = self.current.lock().await;
                match guard.as_mut().map(Child::try_wait) {
                    Some(Ok(Some(status))) => Some(status.to_string()),
                    _ => None,
                }
            };
            if let Some(status) = exited {
                let stderr = stderr_buf
                    .lock()
                    .map(|l| l.join("\n"))
                    .unwrap_or_default();
                return Readiness::Exited(format!("worker exited ({status}): {stderr}"));
            }

            if Instant::now() >= deadline {
                return Readiness::TimedOut;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Issue the test-execution RPC with the configured retry policy.
    async fn send_request(&self, request: &TestRequest) -> Result<TestResponse, WorkerError> {
        let url = format!("http://127.0.0.1:{}/run-test", self.config.port);
        let request_timeout = self.config.request_timeout;

        self.config
            .handler
            .run(|| {
                let client = self.client.clone();
                let url = url.clone();
                let body = request.clone();
                async move {
                    let response =
                        tokio::time::timeout(request_timeout, client.post(&url).json(&body).send())
                            .await
                            .map_err(|_| WorkerError::Timeout)?
                            .map_err(|e| WorkerError::ConnectionFailed(e.to_string()))?;

                    if !response.status().is_success() {
                        return Err(WorkerError::ConnectionFailed(format!(
                            "worker returned {}",
                            response.status()
                        )));
                    }
                    response
                        .json::<TestResponse>()
                        .await
                        .map_err(|e| WorkerError::InvalidResponse(e.to_string()))
                }
            })
            .await
    }

    async fn run_isolated(&self, test_file_name: &str, project_name: &str) -> TestOutcome {
        let (mut stdout_rx, stderr_buf) = match self.spawn_worker(project_name).await {
            Ok(channels) => channels,
            Err(err) => return TestOutcome::transport(err.to_string()),
        };

        match self.wait_ready(&mut stdout_rx, &stderr_buf).await {
            Readiness::Ready => {}
            Readiness::SetupError(payload) => {
                info!("Worker reported setup error, skipping RPC");
                return TestOutcome::setup_error(payload);
            }
            Readiness::Exited(message) => return TestOutcome::transport(message),
            Readiness::TimedOut => {
                return TestOutcome::transport(format!(
                    "worker not ready within {:?}",
                    self.config.ready_timeout
                ))
            }
        }

        // The serving stack needs a moment after the process reports alive.
        tokio::time::sleep(self.config.warmup_delay).await;

        let request = TestRequest {
            test_file_name: test_file_name.to_string(),
            project_name: project_name.to_string(),
        };
        match self.send_request(&request).await {
            Ok(response) => TestOutcome::from_response(response),
            Err(err) => TestOutcome::transport(err.to_string()),
        }
    }
}

#[async_trait]
impl TestWorker for WorkerManager {
    #[instrument(skip(self), fields(test = %test_file_name, project = %project_name))]
    async fn execute_test(
        &self,
        test_file_name: &str,
        project_name: &str,
    ) -> Result<TestOutcome, WorkerError> {
        // Never two workers for the same project: stop-then-restart.
        self.stop().await;

        let outcome = self.run_isolated(test_file_name, project_name).await;

        // Teardown is unconditional; kill_on_drop backs this up.
        self.stop().await;

        debug!(success = outcome.success, "Test execution finished");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(script: &str) -> WorkerConfig {
        WorkerConfig::new("sh", vec!["-c".to_string(), script.to_string()])
            .with_port(49173)
            .with_warmup_delay(Duration::from_millis(0))
            .with_ready_timeout(Duration::from_secs(5))
            .with_request_timeout(Duration::from_millis(500))
            .with_handler(RequestHandler::new(2, Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn test_setup_error_short_circuits_without_rpc() {
        let script = r#"echo '{"status": "error", "is_migration_setup_error": true, "exit": {"error": "migration failed"}}'; sleep 5"#;
        let manager = WorkerManager::new(fast_config(script));

        let outcome = manager.execute_test("test_trade.py", "demo").await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.is_setup_error());
        assert!(outcome.diagnostic().contains("migration failed"));
    }

    #[tokio::test]
    async fn test_worker_exit_before_ready_is_transport_failure() {
        let script = "echo 'boom' >&2; exit 3";
        let manager = WorkerManager::new(fast_config(script));

        let outcome = manager.execute_test("test_trade.py", "demo").await.unwrap();

        assert!(!outcome.success);
        assert!(!outcome.is_setup_error());
        assert!(outcome.diagnostic().contains("exited"));
    }

    #[tokio::test]
    async fn test_connection_failure_after_retries_is_transport_failure() {
        // Worker reports ready but nothing listens on the loopback port.
        let script = r#"echo '{"status": "ready"}'; sleep 5"#;
        let manager = WorkerManager::new(fast_config(script));

        let outcome = manager.execute_test("test_trade.py", "demo").await.unwrap();

        assert!(!outcome.success);
        assert!(matches!(
            outcome.failure,
            Some(crate::outcome::FailureDetail::Transport { .. })
        ));
    }
}
