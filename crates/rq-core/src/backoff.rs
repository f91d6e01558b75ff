use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with jitter for retrying store calls.
///
/// Delay for attempt `n` is `base * 2^n`, capped at `max`, then scaled by a
/// random factor in `[0.5, 1.0]` so that workers recovering from the same
/// outage do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the delay for the current attempt, before jitter
    pub fn ceiling(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);
        ceiling.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

/// Run `op` until it succeeds, fails with an error `should_retry` rejects, or
/// `max_attempts` calls have been made.
pub async fn retry<T, E, F, Fut>(
    mut backoff: Backoff,
    max_attempts: u32,
    should_retry: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut calls = 0;
    loop {
        calls += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if calls < max_attempts && should_retry(&e) => {
                let delay = backoff.next_delay();
                warn!(attempt = calls, delay_ms = delay.as_millis() as u64, error = %e, "Retrying store call");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
