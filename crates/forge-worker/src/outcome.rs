//! Test outcomes and the worker wire protocol.

use serde::{Deserialize, Serialize};

/// Request sent to the worker's loopback RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRequest {
    pub test_file_name: String,
    pub project_name: String,
}

/// Captured console streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleOutput {
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
}

/// Response from the worker's RPC endpoint.
///
/// `exit` being present signals a fatal environment/migration setup error
/// rather than a test failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResponse {
    pub success: bool,
    #[serde(default)]
    pub console_output: ConsoleOutput,
    #[serde(default)]
    pub exit: Option<serde_json::Value>,
}

/// Why a test execution failed.
///
/// The retry policy treats all of these as failures; only the payload
/// differs. Setup errors additionally short-circuit the group's retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FailureDetail {
    /// Worker failed to initialize (e.g. schema migration failure).
    EnvironmentSetup { payload: serde_json::Value },
    /// Process spawn or RPC failure, retries exhausted.
    Transport { message: String },
    /// The test ran and failed substantively.
    Assertion {
        message: String,
        failing_test: Option<String>,
    },
}

/// Result of executing one test group's tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub success: bool,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub failure: Option<FailureDetail>,
}

impl TestOutcome {
    #[must_use]
    pub fn passed(stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            failure: None,
        }
    }

    #[must_use]
    pub fn setup_error(payload: serde_json::Value) -> Self {
        Self {
            success: false,
            stdout: vec![],
            stderr: vec![],
            failure: Some(FailureDetail::EnvironmentSetup { payload }),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: vec![],
            stderr: vec![],
            failure: Some(FailureDetail::Transport {
                message: message.into(),
            }),
        }
    }

    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(self.failure, Some(FailureDetail::EnvironmentSetup { .. }))
    }

    /// One-line diagnostic for reporting.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match &self.failure {
            None => "ok".to_string(),
            Some(FailureDetail::EnvironmentSetup { payload }) => {
                format!("environment setup failed: {payload}")
            }
            Some(FailureDetail::Transport { message }) => format!("transport: {message}"),
            Some(FailureDetail::Assertion {
                message,
                failing_test,
            }) => match failing_test {
                Some(test) => format!("{test}: {message}"),
                None => message.clone(),
            },
        }
    }

    /// Interpret a worker RPC response.
    #[must_use]
    pub fn from_response(response: TestResponse) -> Self {
        if let Some(payload) = response.exit {
            return Self::setup_error(payload);
        }

        let stdout = response.console_output.stdout;
        let stderr = response.console_output.stderr;

        if response.success {
            return Self::passed(stdout, stderr);
        }

        // Worker ran the test and it failed: pull the first ERROR/FAIL
        // marker line as the message and the failing test id if present.
        let message = stderr
            .iter()
            .find(|l| l.contains("ERROR") || l.contains("FAIL"))
            .cloned()
            .unwrap_or_else(|| "test failed".to_string());
        let failing_test = stderr.iter().find_map(|l| {
            l.strip_prefix("FAILED ")
                .map(|rest| rest.split_whitespace().next().unwrap_or(rest).to_string())
        });

        Self {
            success: false,
            stdout,
            stderr,
            failure: Some(FailureDetail::Assertion {
                message,
                failing_test,
            }),
        }
    }
}
