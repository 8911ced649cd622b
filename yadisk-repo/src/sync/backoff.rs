use std::future::Future;
use std::time::Duration;

use rand::Rng;
use yadisk_core::YadiskError;

/// Exponential delay schedule, optionally with full jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self
            .base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max);
        if !self.jitter {
            return ceiling;
        }
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=ceiling_ms))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10), true)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `attempts` calls have been made.
pub async fn retry_transient<T, F, Fut>(
    backoff: &Backoff,
    attempts: u32,
    what: &str,
    mut op: F,
) -> Result<T, YadiskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, YadiskError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt.saturating_add(1) < attempts => {
                let delay = backoff.delay(attempt);
                tracing::debug!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient api error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
