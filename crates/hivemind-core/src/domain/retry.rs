//! Backoff policy for transport failures.
//!
//! Loops that hit `QueueUnavailable` sleep for
//! `base_delay * multiplier^(failures - 1)`, capped at `max_delay`, with
//! full jitter so a fleet of executors does not retry in lockstep.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Base delay after the first failure.
    #[serde(with = "millis")]
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Rejects policies whose delays would shrink or are not numbers.
    pub fn check(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be a finite number >= 1, got {}", self.multiplier));
        }
        if self.base_delay > self.max_delay {
            return Err(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            ));
        }
        Ok(())
    }

    /// Deterministic ceiling for the `failures`-th consecutive failure
    /// (1-indexed). `failures == 0` is treated as the first.
    pub fn ceiling(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(30) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        // NaN or negative products fall back to the cap or zero
        let secs = if secs.is_nan() { max } else { secs.clamp(0.0, max) };
        Duration::from_secs_f64(secs)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let ceiling = self.ceiling(failures);
        let half = ceiling / 2;
        let jitter_ms = half.as_millis() as u64;
        if jitter_ms == 0 {
            return ceiling;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_increases_until_cap() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.ceiling(1), Duration::from_millis(100));
        assert_eq!(policy.ceiling(2), Duration::from_millis(200));
        assert_eq!(policy.ceiling(3), Duration::from_millis(400));
        assert_eq!(policy.ceiling(4), Duration::from_millis(500));
        assert_eq!(policy.ceiling(40), Duration::from_millis(500));
    }

    #[test]
    fn degenerate_multipliers_never_panic() {
        for multiplier in [-2.0, 0.0, f64::NAN, f64::INFINITY] {
            let policy = RetryPolicy {
                multiplier,
                ..RetryPolicy::default()
            };
            assert!(policy.check().is_err());
            for failures in 1..6 {
                assert!(policy.next_delay(failures) <= policy.max_delay);
            }
        }
        assert!(RetryPolicy::default().check().is_ok());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for failures in 1..8 {
            let ceiling = policy.ceiling(failures);
            for _ in 0..20 {
                let d = policy.next_delay(failures);
                assert!(d <= ceiling);
                assert!(d >= ceiling / 2);
            }
        }
    }
}
