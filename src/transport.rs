//! Push transport contract.
//!
//! The manager owns at most one open [`TransportHandle`] at a time and is
//! the only consumer of its events. Transport lifecycle is expressed as a
//! bounded set of ordered event variants instead of separate callbacks; a
//! successfully resolved [`TransportFactory::open`] plays the role of the
//! open notification.

use async_trait::async_trait;

use crate::error::ChannelResult;

/// Event emitted by an open transport handle, in receipt order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A raw message body arrived. Decoding is the manager's job; a
    /// malformed body is not a transport failure.
    Message(String),
    /// The server side closed the transport.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
    /// The transport failed.
    Failed(String),
}

impl TransportEvent {
    /// True for `Closed` and `Failed`, after which no further message
    /// events are delivered.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed(_))
    }
}

/// An open push connection.
#[async_trait]
pub trait TransportHandle: Send {
    /// Wait for the next transport event.
    ///
    /// After a terminal event the handle keeps reporting `Closed`; the
    /// manager drops it after the first terminal event.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the transport from the manager side. No events are observed
    /// afterwards.
    async fn close(&mut self);
}

/// Opens push connections for a manager.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a push connection to `endpoint`.
    ///
    /// # Errors
    /// Returns a transport error when the connection cannot be established.
    async fn open(&self, endpoint: &str) -> ChannelResult<Box<dyn TransportHandle>>;
}
