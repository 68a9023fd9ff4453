//! Bounded exponential backoff for contended units of work.

use std::time::Duration;

use crate::error::TrackingError;

/// Retry settings for a whole unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(self.initial_backoff, self.max_backoff, attempt)
    }

    /// Run `f` until it succeeds, fails with a non-contention error, or
    /// the attempts run out.
    ///
    /// Exhaustion is reported as [`TrackingError::RetriesExhausted`] so the
    /// caller can tell it apart from a permanently invalid request.
    pub fn run<T, F>(&self, op: &str, mut f: F) -> Result<T, TrackingError>
    where
        F: FnMut() -> Result<T, TrackingError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_contention() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} hit contention on attempt {}/{}: {}. Retrying in {:?}",
                        op,
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(err) if err.is_contention() => {
                    tracing::error!("{} still contended after {} attempts, giving up", op, attempts);
                    return Err(TrackingError::RetriesExhausted {
                        attempts,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// `initial * 2^(attempt - 1)`, capped at `max`.
pub(crate) fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    initial.saturating_mul(1u32 << exponent).min(max)
}
