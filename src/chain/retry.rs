use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::RpcError;

/// Bounded exponential backoff policy for ledger calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay.max(self.base_delay))
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt cap is hit.
///
/// Only errors in the transient whitelist (`RpcError::is_transient`) are retried;
/// anything else is returned on first occurrence.
pub async fn with_retry<T, Op, Fut>(policy: &RetryPolicy, context: &str, op: Op) -> Result<T, RpcError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    with_retry_if(policy, context, RpcError::is_transient, op).await
}

/// `with_retry` with a caller-chosen whitelist, for operations that are not
/// safe to repeat on every transient error
pub async fn with_retry_if<T, Op, Fut>(
    policy: &RetryPolicy,
    context: &str,
    retryable: fn(&RpcError) -> bool,
    mut op: Op,
) -> Result<T, RpcError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    context,
                    attempt,
                    max_attempts,
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if retryable(&err) {
                    warn!("{} exhausted {} attempts: {}", context, max_attempts, err);
                }
                return Err(err);
            }
        }
    }
}
