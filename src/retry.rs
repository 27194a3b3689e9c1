//! Bounded retries with exponential backoff.
//!
//! Wraps adapter calls that touch the network: transient failures are
//! retried up to `max_attempts` with delays of `base_delay * multiplier^n`
//! (optionally jittered), permanent failures surface immediately, and the
//! last transient error is re-raised after exhaustion.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::error::AdapterError;

/// Backoff knobs for one class of adapter calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Add up to half the computed delay at random.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let mut delay = self.base_delay.mul_f64(factor.max(0.0));
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
            delay += Duration::from_millis(extra);
        }
        delay
    }
}

/// Run `op` under `policy`, labeled for logs.
pub fn with_retries<T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: impl FnMut() -> Result<T, AdapterError>,
) -> Result<T, AdapterError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => {
                if attempt > 1 {
                    info!(label, attempt, "succeeded on retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                std::thread::sleep(delay);
            }
            Err(err) => {
                warn!(label, attempt, error = %err, "giving up");
                return Err(err);
            }
        }
    }
    unreachable!("loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = Cell::new(0);
        let out = with_retries(&quick(), "t", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(AdapterError::Transient(anyhow::anyhow!("flaky")))
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn reraises_after_exhaustion() {
        let calls = Cell::new(0);
        let err = with_retries(&quick(), "t", || -> Result<(), _> {
            calls.set(calls.get() + 1);
            Err(AdapterError::Transient(anyhow::anyhow!("down")))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert!(err.is_transient());
    }

    #[test]
    fn permanent_failures_do_not_retry() {
        let calls = Cell::new(0);
        let err = with_retries(&quick(), "t", || -> Result<(), _> {
            calls.set(calls.get() + 1);
            Err(AdapterError::Permanent(anyhow::anyhow!("bad request")))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(!err.is_transient());
    }

    #[test]
    fn delays_grow_geometrically() {
        let p = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(p.delay_for(1), Duration::from_secs(4));
        assert_eq!(p.delay_for(2), Duration::from_secs(8));
        assert_eq!(p.delay_for(3), Duration::from_secs(16));
    }
}
