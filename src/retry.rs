//! Bounded-time exponential backoff retry.
//!
//! [`BackoffPolicy`] decides how long to wait between attempts and when to give up;
//! [`retry_notify`] drives any fallible async operation with it. The delay for
//! attempt `n` (0-indexed) is `first × factor^n`, clamped to `max_delay`. A new
//! attempt is only started while the elapsed time plus the upcoming delay stays
//! within `max_elapsed`, so the total time never overshoots the budget by more
//! than one attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Cap for a single delay.
    pub max_delay: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Total time budget across all attempts and delays.
    pub max_elapsed: Duration,
}

impl Default for BackoffPolicy {
    /// 500ms first delay growing by 1.5 up to 60s, for at most 60s in total.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            factor: 1.5,
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Policy with the given total budget and default delay shape.
    pub fn with_max_elapsed(max_elapsed: Duration) -> Self {
        Self {
            max_elapsed,
            ..Self::default()
        }
    }

    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `operation` until it succeeds or the policy's time budget runs out.
///
/// `notify` is called with the error and the upcoming delay after every failed
/// attempt that will be retried. On exhaustion the last error is returned.
pub async fn retry_notify<T, E, F, Fut, N>(policy: &BackoffPolicy, mut operation: F, mut notify: N) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&E, Duration),
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let delay = policy.next(attempt);
        if started.elapsed() + delay > policy.max_elapsed {
            return Err(err);
        }

        notify(&err, delay);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}
