//! # Retry Backoff Policy
//!
//! Pure arithmetic for retry scheduling. The queue computes an operation's
//! `next_eligible_at` as `now + delay_for(attempts, id)`; nothing here reads
//! a clock or sleeps.
//!
//! ## Shape
//! ```text
//! delay(n) = min(cap, base * 2^(n-1)) * (1 ± jitter)
//!
//!   attempt 1:   base
//!   attempt 2:   base * 2
//!   attempt 3:   base * 4
//!   ...
//!   attempt k:   cap            (clamped, jitter applied inside the cap)
//! ```
//!
//! Jitter spreads retries to avoid a thundering herd when many operations
//! fail at once (e.g., the link drops), but is derived from a hash of the
//! operation id and attempt number rather than an RNG, so the schedule is
//! fully deterministic and unit-testable.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff with a cap and deterministic jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,

    /// Upper bound on the computed delay (applied before jitter; the
    /// jittered result is clamped back under the cap so the schedule is
    /// non-decreasing all the way up to it).
    pub cap: Duration,

    /// Jitter amplitude as a fraction of the delay, in `[0.0, 0.33)`.
    /// Kept below 1/3 so doubling always dominates the jitter and
    /// consecutive delays never decrease.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(60),
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy, clamping `jitter_ratio` into its valid range.
    pub fn new(base: Duration, cap: Duration, jitter_ratio: f64) -> Self {
        BackoffPolicy {
            base,
            cap,
            jitter_ratio: jitter_ratio.clamp(0.0, 0.32),
        }
    }

    /// Delay to wait after the `attempts`-th failure of operation `seed`.
    ///
    /// `attempts` counts failures so far, starting at 1. The `seed` (the
    /// operation id) decorrelates jitter across operations while keeping
    /// it reproducible for a given operation and attempt.
    pub fn delay_for(&self, attempts: u32, seed: &str) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = attempts.saturating_sub(1).min(32);
        let raw_ms = (self.base.as_millis() as u64).saturating_mul(1u64 << exponent);
        let capped_ms = raw_ms.min(self.cap.as_millis() as u64);

        let jittered = capped_ms as f64 * (1.0 + self.jitter_fraction(attempts, seed));
        let clamped = jittered.min(self.cap.as_millis() as f64).max(0.0);

        Duration::from_millis(clamped as u64)
    }

    /// Signed jitter fraction in `[-jitter_ratio, +jitter_ratio]`, derived
    /// from a stable hash of the seed and attempt number.
    fn jitter_fraction(&self, attempts: u32, seed: &str) -> f64 {
        if self.jitter_ratio == 0.0 {
            return 0.0;
        }

        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        attempts.hash(&mut hasher);
        let unit = (hasher.finish() % 10_000) as f64 / 10_000.0;

        (unit * 2.0 - 1.0) * self.jitter_ratio
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
