use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::RemoteError;
use crate::remote::client::{RemoteClient, WorkUnit};
use crate::scheduler::JobParams;

/// Attempt budget with exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Wait after the `attempt`-th failure (1-based): base, 2x base, 4x base...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.attempts, config.base_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Runs the start-then-download exchange under a [`RetryPolicy`].
///
/// A failure in either phase, including a rejection reported by the service,
/// costs one attempt and restarts from the start call.
#[derive(Clone)]
pub struct RetryingClient {
    inner: Arc<dyn RemoteClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn RemoteClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Prepare input for `params` and store it at `dest`.
    pub async fn fetch(&self, params: &JobParams, dest: &Path) -> Result<WorkUnit, RemoteError> {
        let attempts = self.policy.attempts;
        let mut attempt = 1;

        loop {
            match self.exchange(params, dest).await {
                Ok(unit) => return Ok(unit),
                Err(e) => {
                    tracing::error!(attempt, attempts, error = %e, "Remote preparation attempt failed");
                    if attempt >= attempts {
                        tracing::error!(attempts, "All retry attempts failed");
                        return Err(RemoteError::Exhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.policy.delay_after(attempt);
                    tracing::info!(delay_secs = delay.as_secs_f64(), "Retrying remote preparation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn exchange(&self, params: &JobParams, dest: &Path) -> Result<WorkUnit, RemoteError> {
        let unit = self.inner.start_processing(params).await?;
        self.inner.download_result(&unit, dest).await?;
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.attempts, 1);
    }
}
