use rand::Rng;
use std::time::Duration;

/// Exponential delay schedule for retried listing calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// `base * 2^attempt`, capped at `max`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.base
            .checked_mul(1u32 << attempt.min(20))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// With jitter the delay is drawn from the upper half of the ceiling, so
    /// the schedule still grows between attempts.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        ceiling.mul_f64(rng.gen_range(0.5..=1.0))
    }

    /// A server-provided `Retry-After` wins over the computed schedule but is
    /// still capped at `max`.
    pub fn delay_honoring(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) => wait.min(self.max),
            None => self.delay(attempt),
        }
    }
}
