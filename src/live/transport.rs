//! WebSocket transport for the live channel.
//!
//! Features:
//! - Plain `ws://` and secure `wss://` (rustls, native roots)
//! - Automatic ping/pong for keep-alive
//! - A [`Connector`]/[`EventSource`] seam so the client can run against any
//!   transport

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{client::IntoClientRequest, http::header::USER_AGENT, Message},
    Connector as TlsConnector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use crate::error::{CountError, Result};

/// A live transport that yields text payloads until it closes.
#[async_trait]
pub trait EventSource: Send {
    /// Next payload; `None` once the transport is closed.
    ///
    /// An `Err` is a transport diagnostic; the source reports `None` on the
    /// following call.
    async fn next_payload(&mut self) -> Option<Result<String>>;

    /// Close the transport.
    async fn close(&mut self) -> Result<()>;
}

/// Opens [`EventSource`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn EventSource>>;
}

/// WebSocket connection with TLS support and automatic ping/pong.
pub struct WebSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    ended: bool,
}

impl WebSocket {
    /// Connect to a WebSocket endpoint
    pub async fn connect(url: &str) -> Result<Self> {
        // Ensure crypto provider is installed
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut request = url.into_client_request()?;
        if let Ok(agent) = concat!("linecount/", env!("CARGO_PKG_VERSION")).parse() {
            request.headers_mut().insert(USER_AGENT, agent);
        }

        info!("Connecting WebSocket to {}", url);

        // Only used for wss:// URLs
        let connector = TlsConnector::Rustls(Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates({
                    let mut roots = rustls::RootCertStore::empty();
                    let certs = rustls_native_certs::load_native_certs();
                    for cert in certs.certs {
                        let _ = roots.add(cert);
                    }
                    roots
                })
                .with_no_client_auth(),
        ));

        let (stream, response) =
            connect_async_tls_with_config(request, None, false, Some(connector)).await?;

        debug!("WebSocket connected: {:?}", response.status());

        Ok(Self {
            stream,
            url: url.to_string(),
            ended: false,
        })
    }

    /// Receive the next application-level message.
    ///
    /// Ping frames are answered automatically with Pong. Pong and raw
    /// Frame messages are silently consumed so the caller only sees
    /// Text, Binary, or Close messages.
    pub async fn recv(&mut self) -> Result<Option<WebSocketMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => return Ok(Some(WebSocketMessage::Text(text))),
                    Message::Binary(data) => return Ok(Some(WebSocketMessage::Binary(data))),
                    Message::Ping(data) => {
                        // Auto-respond with pong
                        let _ = self.stream.send(Message::Pong(data)).await;
                        continue;
                    }
                    Message::Pong(_) => {
                        debug!("Received pong");
                        continue;
                    }
                    Message::Close(frame) => {
                        info!("WebSocket closed: {:?}", frame);
                        return Ok(Some(WebSocketMessage::Close));
                    }
                    Message::Frame(_) => continue,
                },
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}

#[async_trait]
impl EventSource for WebSocket {
    async fn next_payload(&mut self) -> Option<Result<String>> {
        if self.ended {
            return None;
        }
        match self.recv().await {
            Ok(Some(WebSocketMessage::Text(text))) => Some(Ok(text)),
            Ok(Some(WebSocketMessage::Binary(data))) => Some(String::from_utf8(data).map_err(
                |_| CountError::MalformedEvent("binary payload is not UTF-8".to_string()),
            )),
            Ok(Some(WebSocketMessage::Close) | None) => {
                self.ended = true;
                None
            }
            Err(e) => {
                self.ended = true;
                Some(Err(e))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.ended = true;
        match self.stream.close(None).await {
            Ok(())
            | Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => {
                info!(url = %self.url, "WebSocket closed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Application-level WebSocket message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary data frame.
    Binary(Vec<u8>),
    /// Connection close frame.
    Close,
}

impl WebSocketMessage {
    /// Borrow the text payload, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close)
    }
}

/// [`Connector`] that opens [`WebSocket`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn EventSource>> {
        let ws = WebSocket::connect(url).await?;
        Ok(Box::new(ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_accessors() {
        let msg = WebSocketMessage::Text("hello".to_string());
        assert_eq!(msg.as_text(), Some("hello"));
        assert!(!msg.is_close());
    }

    #[test]
    fn test_message_close_accessors() {
        let msg = WebSocketMessage::Close;
        assert!(msg.is_close());
        assert_eq!(msg.as_text(), None);
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        // Port 9 (discard) is closed on test hosts.
        let result = WebSocket::connect("ws://127.0.0.1:9/ws/video-count").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_is_error() {
        assert!(WsConnector.connect("not a url").await.is_err());
    }
}
