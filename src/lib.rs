//! Resilient live data channel.
//!
//! Maintains a push-based data stream from a server and transparently
//! degrades to periodic pull-based retrieval when the push transport is
//! unavailable, then recovers automatically:
//!
//! - exponential backoff between reconnect attempts, with a finite or
//!   unbounded attempt budget chosen explicitly per channel;
//! - fallback polling through a pluggable fetcher whenever the push
//!   transport is down;
//! - a status surface publishing connection state, attempt count, latest
//!   payload, and last error to any number of subscribers;
//! - deterministic resource cleanup: closing a channel synchronously
//!   cancels its timers, polling, and in-flight work.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use livefeed::{Channel, ChannelConfig, HttpFetcher, MaxAttempts, WebSocketFactory};
//!
//! # async fn run() -> livefeed::ChannelResult<()> {
//! let config = ChannelConfig::new("wss://feed.example/live", MaxAttempts::Finite(5));
//! let channel: Channel<serde_json::Value> =
//!     Channel::builder(config, Arc::new(WebSocketFactory::new()))
//!         .with_fallback_fetcher(Arc::new(HttpFetcher::new("https://feed.example/snapshot")))
//!         .build()?;
//!
//! let _sub = channel.subscribe(|status| {
//!     println!("state={:?} attempt={}", status.state, status.attempt);
//! });
//! channel.connect().await?;
//! # channel.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod fetch;
pub mod manager;
mod polling;
pub mod status;
pub mod transport;
pub mod ws;

pub use backoff::{Backoff, ExponentialBackoff, JitteredBackoff};
pub use config::{ChannelConfig, MaxAttempts};
pub use error::{ChannelError, ChannelResult};
pub use fetch::{FallbackFetcher, HttpFetcher};
pub use manager::{Channel, ChannelBuilder};
pub use status::{
    ConnectionState, LatestPayload, PayloadSource, StatusPublisher, StatusSnapshot, Subscription,
};
pub use transport::{TransportEvent, TransportFactory, TransportHandle};
pub use ws::WebSocketFactory;
