//! Bounded-retry request handling with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry policy for the loopback RPC call.
///
/// Up to `max_retries` attempts; after each failed attempt the handler
/// sleeps `retry_delay`, which doubles every time. The final attempt's
/// error is surfaced, never swallowed.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for RequestHandler {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RequestHandler {
    #[must_use]
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The delays slept between failed attempts, in order.
    ///
    /// With `max_retries = 3` and a 2s base delay this is `[2s, 4s]`.
    #[must_use]
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.retry_delay;
        for _ in 1..self.max_retries {
            delays.push(delay);
            delay *= 2;
        }
        delays
    }

    /// Run `op` with the retry policy.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries => {
                    warn!(attempt, %err, "Request failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
