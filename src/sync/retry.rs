use std::future::Future;
use std::time::Duration;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Bounded retry with exponential backoff.
///
/// `max_retries` counts retries after the first attempt, so an operation runs
/// at most `max_retries + 1` times. The sleep before retry `n` (0-based) is
/// `base_delay * 2^n`, capped at one minute: 2s, 4s, 8s with the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Retries without sleeping in between (tests, local stores).
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::immediate(0)
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `op` until it succeeds or retries are exhausted, returning the last
    /// error. `on_retry` sees each failure that is about to be retried, along
    /// with the retry number and the delay about to be slept.
    pub async fn run<T, E, F, Fut>(&self, mut op: F, mut on_retry: impl FnMut(&E, u32, Duration)) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    on_retry(&e, retry, delay);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
