use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::RetryExhausted;

/// Exponential backoff with a hard cap. Defaults match the production
/// dispatch schedule: up to 5 retries, a minute of base delay, ten minutes at
/// the ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay floor before retry `attempt` (0-based): base
    /// doubled per attempt, saturating, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Backoff plus uniform jitter in `[0, base_delay]`, so dispatchers that
    /// failed together do not retry in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base_ms)
        };
        self.backoff(attempt)
            .saturating_add(Duration::from_millis(jitter))
    }
}

/// Run `op` until it succeeds or the retry budget is spent. Every failure
/// short of the budget sleeps for the policy delay and tries again; the
/// final failure comes back as [`RetryExhausted`] with the last cause.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(source) => {
                if attempt == policy.max_retries {
                    return Err(RetryExhausted {
                        attempts: attempt + 1,
                        source,
                    });
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %source,
                    "attempt failed, backing off"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
