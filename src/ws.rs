//! WebSocket push transport.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::error::{ChannelError, ChannelResult};
use crate::transport::{TransportEvent, TransportFactory, TransportHandle};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// [`TransportFactory`] backed by `tokio-tungstenite`.
///
/// The per-attempt connect timeout is applied by the manager, not here.
#[derive(Debug, Clone, Default)]
pub struct WebSocketFactory;

impl WebSocketFactory {
    /// Create a factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebSocketFactory {
    async fn open(&self, endpoint: &str) -> ChannelResult<Box<dyn TransportHandle>> {
        let url = Url::parse(endpoint)
            .map_err(|e: url::ParseError| ChannelError::Transport(e.to_string()))?;

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        debug!(endpoint, "WebSocket transport opened");
        Ok(Box::new(WebSocketHandle {
            inner: ws_stream,
            closed: false,
        }))
    }
}

/// Active WebSocket connection wrapper.
struct WebSocketHandle {
    inner: WsStream,
    closed: bool,
}

#[async_trait]
impl TransportHandle for WebSocketHandle {
    async fn next_event(&mut self) -> TransportEvent {
        if self.closed {
            return TransportEvent::Closed {
                reason: "transport closed".into(),
            };
        }

        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Message(text.to_string());
                }
                Some(Ok(Message::Binary(data))) => {
                    let event = binary_event(data);
                    if event.is_terminal() {
                        self.closed = true;
                    }
                    return event;
                }
                // Tungstenite answers pings itself; nothing to surface.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    let reason = frame.map_or_else(
                        || "closed by server".to_string(),
                        |f| format!("closed by server: {} ({})", f.reason, u16::from(f.code)),
                    );
                    return TransportEvent::Closed { reason };
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return TransportEvent::Failed(e.to_string());
                }
                None => {
                    self.closed = true;
                    return TransportEvent::Closed {
                        reason: "end of stream".into(),
                    };
                }
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.inner.close(None).await {
                debug!(error = %e, "Error closing WebSocket transport");
            }
        }
    }
}

/// Binary frames carry the same payload bodies as text frames here, so
/// they must be valid UTF-8; a frame that is not gets surfaced as a
/// transport failure instead of being silently repaired.
fn binary_event(data: tokio_tungstenite::tungstenite::Bytes) -> TransportEvent {
    match String::from_utf8(Vec::from(data)) {
        Ok(text) => TransportEvent::Message(text),
        Err(e) => TransportEvent::Failed(format!("binary frame is not valid UTF-8: {e}")),
    }
}
