//! Channel error taxonomy.

use std::time::Duration;

/// Channel errors.
///
/// Only [`ChannelError::Closed`] and [`ChannelError::Config`] are ever
/// returned to API callers. Every other variant is absorbed by the
/// connection manager and surfaced as the `last_error` field of the
/// published status snapshot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// Push transport failed to open or dropped.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A single message body could not be decoded.
    #[error("Decode failure: {0}")]
    Decode(String),

    /// The fallback fetcher rejected.
    #[error("Fetch failure: {0}")]
    Fetch(String),

    /// Connect attempt exceeded the configured timeout.
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// Operation attempted after `close()`.
    #[error("Channel is closed")]
    Closed,

    /// Invalid configuration, rejected at construction time.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ChannelError {
    /// True for failures handled by the reconnect/polling path rather than
    /// reported to the caller.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Decode(_) | Self::Fetch(_) | Self::Timeout(_)
        )
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
