//! Channel configuration.

use std::time::Duration;

use crate::error::{ChannelError, ChannelResult};

/// Automatic reconnect attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    /// Stop automatic reconnects after this many consecutive failures and
    /// fall back to polling only. Must be positive.
    Finite(u32),
    /// Never stop retrying automatically.
    Unbounded,
}

impl MaxAttempts {
    /// Whether attempt number `attempt` (0-indexed count of failures so far)
    /// is still within the limit.
    #[must_use]
    pub const fn allows(self, attempt: u32) -> bool {
        match self {
            Self::Finite(max) => attempt < max,
            Self::Unbounded => true,
        }
    }
}

/// Channel configuration, immutable once a manager is bound to it.
///
/// There is no default retry limit: whether a channel retries forever or
/// gives up and polls is an explicit deployment decision.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Push transport endpoint.
    pub endpoint: String,
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Multiplier applied per successive attempt.
    pub backoff_factor: f64,
    /// Automatic reconnect attempt limit.
    pub max_attempts: MaxAttempts,
    /// Interval between fallback fetches while the push transport is down.
    pub polling_interval: Duration,
    /// Per-attempt connect timeout. Expiry is treated exactly like a
    /// transport error. `None` disables the timeout.
    pub connect_timeout: Option<Duration>,
}

impl ChannelConfig {
    /// Create a configuration with conventional delays for `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, max_attempts: MaxAttempts) -> Self {
        Self {
            endpoint: endpoint.into(),
            base_delay: Duration::from_secs(3),
            backoff_factor: 1.5,
            max_attempts,
            polling_interval: Duration::from_secs(30),
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Set the base reconnect delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the fallback polling interval.
    #[must_use]
    pub const fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the per-attempt connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`ChannelError::Config`] for a non-positive delay or
    /// interval, a backoff factor below 1, a zero attempt cap, or an empty
    /// endpoint.
    pub fn validate(&self) -> ChannelResult<()> {
        if self.endpoint.is_empty() {
            return Err(ChannelError::Config("endpoint must not be empty".into()));
        }
        if self.base_delay.is_zero() {
            return Err(ChannelError::Config("base_delay must be positive".into()));
        }
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(ChannelError::Config(
                "backoff_factor must be a finite value >= 1".into(),
            ));
        }
        if self.max_attempts == MaxAttempts::Finite(0) {
            return Err(ChannelError::Config(
                "max_attempts must be positive or unbounded".into(),
            ));
        }
        if self.polling_interval.is_zero() {
            return Err(ChannelError::Config(
                "polling_interval must be positive".into(),
            ));
        }
        if let Some(timeout) = self.connect_timeout {
            if timeout.is_zero() {
                return Err(ChannelError::Config(
                    "connect_timeout must be positive when set".into(),
                ));
            }
        }
        Ok(())
    }
}
