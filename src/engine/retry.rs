//! Bounded retry for collaborator calls

use crate::config::EngineConfig;
use crate::error::{ClientError, ClientResult};

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline for a single attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
            timeout: config.request_timeout(),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
///
/// A timed-out attempt counts as a transient failure.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    swap_id: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut attempt = 0;

    loop {
        let result = match timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transient(format!(
                "{} timed out after {:?}",
                operation, policy.timeout
            ))),
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} for swap {} succeeded after {} retries", operation, swap_id, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(
                    "{} for swap {} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation,
                    swap_id,
                    attempt,
                    policy.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
