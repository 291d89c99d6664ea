//! Socket abstraction over the duplex link.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use questlink_core::TransportError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// A frame received from the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The remote end closed the link on purpose.
    Close(Option<String>),
}

/// An established duplex connection carrying text frames.
#[async_trait]
pub trait Socket: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next frame, or `None` once the stream has ended without a close frame.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens sockets. One call per handshake attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint {
                endpoint: url.to_string(),
                reason: e.to_string(),
            })?;
        let connect = tokio_tungstenite::connect_async(request);
        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout {
                endpoint: url.to_string(),
            })?
            .map_err(|e| TransportError::Refused {
                endpoint: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::WebSocket {
                reason: e.to_string(),
            })
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(WsMessage::Close(frame)) => {
                    return Some(Ok(Frame::Close(frame.map(|f| f.reason.into_owned()))))
                }
                // Pings are answered by tungstenite itself. Binary frames are
                // not part of the protocol.
                Ok(_) => continue,
                Err(err) => {
                    return Some(Err(TransportError::WebSocket {
                        reason: err.to_string(),
                    }))
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::WebSocket {
                reason: e.to_string(),
            })
    }
}
