use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter:
/// `min(base * 2^(attempt-1), cap) + uniform[0, jitter)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(60_000),
            jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Capped exponential component for a 1-based attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << shift);
        let cap_ms = self.cap.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(exp_ms.min(cap_ms))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}
