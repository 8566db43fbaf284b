//! Bounded retries for operations that lost a concurrency race.

use std::future::Future;

use fulfillment::Result;

/// Re-runs an operation while it fails with a retryable conflict.
///
/// The engine never retries internally; handlers wrap each unit of work in
/// a policy so a lost race is retried a bounded number of times before the
/// conflict is surfaced.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    tracing::debug!(attempt, error = %err, "retrying after conflict");
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                outcome => return outcome,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
