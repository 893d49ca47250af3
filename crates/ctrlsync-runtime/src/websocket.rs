//! WebSocket transport over tokio-tungstenite

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use ctrlsync_core::{Endpoint, TransportError};

use crate::transport::{Transport, TransportLink};

/// Plain `ws://` transport to the controller's message endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportLink>, TransportError> {
        let raw = endpoint.url();
        let url = Url::parse(&raw).map_err(|e| TransportError::ConnectFailed {
            endpoint: raw.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "ws" {
            return Err(TransportError::ConnectFailed {
                endpoint: raw,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        debug!("Opening WebSocket to {}", url);
        let (stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    endpoint: raw.clone(),
                    reason: e.to_string(),
                })?;

        Ok(Box::new(WebSocketLink { stream }))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WebSocketLink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed {
                reason: e.to_string(),
            })
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("Dropping binary frame that is not UTF-8"),
                },
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "closed by controller".to_string());
                    return Some(Err(TransportError::Closed { reason }));
                }
                // ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(TransportError::ReceiveFailed {
                        reason: e.to_string(),
                    }))
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Closed {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_fails_without_listener() {
        // port 9 (discard) is never served in test environments
        let endpoint = Endpoint::new("127.0.0.1", 9);
        let result = WebSocketTransport::new().open(&endpoint).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_open_rejects_bad_host() {
        let endpoint = Endpoint::new("bad host", 80);
        let result = WebSocketTransport::new().open(&endpoint).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }
}
