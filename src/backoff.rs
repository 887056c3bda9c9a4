//! Reconnect backoff policies.
//!
//! The default policy is deterministic so delay schedules are exactly
//! testable; [`JitteredBackoff`] wraps any policy for deployments that need
//! to avoid thundering-herd reconnects.

use std::time::Duration;

use rand::Rng;

use crate::config::{ChannelConfig, MaxAttempts};

/// Maps an attempt count to a delay and decides whether another automatic
/// attempt is permitted.
///
/// `attempt` is 0-indexed: the first retry after a drop waits `delay(0)`.
pub trait Backoff: Send + Sync {
    /// Delay before retry number `attempt` (0-indexed).
    fn delay(&self, attempt: u32) -> Duration;

    /// Whether another automatic attempt is permitted after `attempt`
    /// consecutive failures.
    fn attempts_allowed(&self, attempt: u32) -> bool;
}

/// Deterministic exponential backoff: `base * factor^attempt`.
///
/// No implicit upper cap; callers that need one set `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    factor: f64,
    max_attempts: MaxAttempts,
    max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    /// Create a policy from explicit parameters.
    #[must_use]
    pub const fn new(base: Duration, factor: f64, max_attempts: MaxAttempts) -> Self {
        Self {
            base,
            factor,
            max_attempts,
            max_delay: None,
        }
    }

    /// Cap every produced delay at `max_delay`.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl From<&ChannelConfig> for ExponentialBackoff {
    fn from(config: &ChannelConfig) -> Self {
        Self::new(config.base_delay, config.backoff_factor, config.max_attempts)
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent);
        let delay = if scaled.is_finite() {
            Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    fn attempts_allowed(&self, attempt: u32) -> bool {
        self.max_attempts.allows(attempt)
    }
}

/// Decorator that scales an inner policy's delay by a random factor in
/// `[0.5, 1.0]`, leaving the attempt limit untouched.
pub struct JitteredBackoff<B> {
    inner: B,
}

impl<B: Backoff> JitteredBackoff<B> {
    /// Wrap `inner` with jitter.
    #[must_use]
    pub const fn new(inner: B) -> Self {
        Self { inner }
    }
}

impl<B: Backoff> Backoff for JitteredBackoff<B> {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = rand::rng().random_range(0.5..=1.0);
        self.inner.delay(attempt).mul_f64(factor)
    }

    fn attempts_allowed(&self, attempt: u32) -> bool {
        self.inner.attempts_allowed(attempt)
    }
}
