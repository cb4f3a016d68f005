use crate::error::{is_retryable, retry_after_secs, SyncError};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Wraps every remote call: bounded concurrency, per-call timeout and
/// exponential back-off on transient failures.
#[derive(Clone, Debug)]
pub struct CallPolicy {
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl CallPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Policy for tests: no back-off delay, a single attempt per call.
    pub fn immediate() -> Self {
        Self::new(1, Duration::ZERO, Duration::from_secs(30), 64)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = std::cmp::min(1u64 << attempt.min(6), 60) as u32;
        std::cmp::min(self.base_delay * exp, Duration::from_secs(60))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_attempts(what, |_| op()).await
    }

    /// Like `run`, but `op` gets the 1-based attempt number. Calls that are not
    /// idempotent use it to reconcile with remote state before sending again.
    pub async fn run_attempts<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let res = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .context("call permits closed")?;
                match tokio::time::timeout(self.timeout, op(attempt)).await {
                    Ok(r) => r,
                    Err(_) => Err(SyncError::Timeout {
                        what: what.to_string(),
                        after: self.timeout,
                    }
                    .into()),
                }
            };
            match res {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    if attempt >= self.max_retries {
                        log::error!("{} failed after {} attempts: {}", what, attempt, e);
                        return Err(e.context(format!("{} failed after {} attempts", what, attempt)));
                    }
                    let mut delay = self.backoff(attempt);
                    if let Some(secs) = retry_after_secs(&e) {
                        delay = delay.max(Duration::from_secs(secs));
                    }
                    log::warn!(
                        "{} attempt {} failed: {}. Retrying in {:?}...",
                        what,
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
