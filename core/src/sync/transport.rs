//! Transport abstraction
//!
//! A connection is a single ordered, full-duplex stream of text and binary
//! messages. It is split on creation: the sink goes to the one task allowed
//! to write, the source to the receive loop.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::protocol::WireMessage;
use crate::{Error, Result};

/// Write half of a connection
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: WireMessage) -> Result<()>;

    /// Close the connection; the remote end sees end-of-stream
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a connection
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` once the remote end closed cleanly
    async fn recv(&mut self) -> Result<Option<WireMessage>>;
}

/// An established connection, already split
pub struct Connection {
    pub sink: Box<dyn MessageSink>,
    pub source: Box<dyn MessageSource>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to a relay
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Connection>;
}

/// WebSocket connector
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

/// `host:port` becomes `ws://host:port`; explicit schemes are kept
pub fn relay_url(address: &str) -> String {
    if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else {
        format!("ws://{}", address)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &str) -> Result<Connection> {
        let url = relay_url(address);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::TransportError(format!("failed to connect to {}: {}", url, e)))?;

        tracing::info!("connected to relay at {}", url);
        Ok(ws_connection(ws_stream))
    }
}

/// Split a WebSocket into a [`Connection`]
pub fn ws_connection<S>(ws_stream: WebSocketStream<S>) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws_stream.split();
    Connection {
        sink: Box::new(WsSink { inner: sink }),
        source: Box::new(WsSource { inner: stream }),
    }
}

struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

fn map_ws_error(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            Error::TransportClosed
        }
        other => Error::TransportError(other.to_string()),
    }
}

#[async_trait]
impl<S> MessageSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Binary(data) => Message::Binary(data.into()),
        };
        self.inner.send(message).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<()> {
        match self.inner.close().await.map_err(map_ws_error) {
            Err(Error::TransportClosed) => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl<S> MessageSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(WireMessage::Text(text.as_str().to_owned())))
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(WireMessage::Binary(data.to_vec())))
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return match map_ws_error(e) {
                        Error::TransportClosed => Ok(None),
                        other => Err(other),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_url() {
        assert_eq!(relay_url("127.0.0.1:5200"), "ws://127.0.0.1:5200");
        assert_eq!(relay_url("ws://relay:1"), "ws://relay:1");
        assert_eq!(relay_url("wss://relay.example"), "wss://relay.example");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is not expected to run a WebSocket server
        let result = WsConnector::new().connect("127.0.0.1:9").await;
        assert!(matches!(result, Err(Error::TransportError(_))));
    }
}
