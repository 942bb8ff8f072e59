//! In-process transport
//!
//! Useful for tests and for embedding the session next to a relay in the
//! same process. Each connect hands the caller one end of a channel pair and
//! queues the other end for whoever plays the relay.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{Connection, Connector, MessageSink, MessageSource};
use crate::protocol::WireMessage;
use crate::{Error, Result};

/// Two connected ends of an in-memory link
pub fn pair() -> (Connection, Connection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Connection {
            sink: Box::new(MemorySink { tx: Some(a_tx) }),
            source: Box::new(MemorySource { rx: b_rx }),
        },
        Connection {
            sink: Box::new(MemorySink { tx: Some(b_tx) }),
            source: Box::new(MemorySource { rx: a_rx }),
        },
    )
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<WireMessage>>,
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::TransportClosed)?;
        tx.send(message).map_err(|_| Error::TransportClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        Ok(self.rx.recv().await)
    }
}

/// Connector whose remote ends are delivered on a channel
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<Connection>,
}

impl MemoryConnector {
    /// The receiver yields the relay-side end of every connection made
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Connection>) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        (Self { accepted }, incoming)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Connection> {
        let (local, remote) = pair();
        self.accepted
            .send(remote)
            .map_err(|_| Error::TransportError(format!("nothing listening at {}", address)))?;
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[tokio::test]
    async fn test_pair_is_ordered_and_closes() {
        let (mut a, mut b) = pair();

        assert_ok!(a.sink.send(WireMessage::Text("id".into())).await);
        assert_ok!(a.sink.send(WireMessage::Binary(vec![7])).await);
        assert_ok!(a.sink.close().await);

        assert_eq!(b.source.recv().await.unwrap(), Some(WireMessage::Text("id".into())));
        assert_eq!(b.source.recv().await.unwrap(), Some(WireMessage::Binary(vec![7])));
        assert_eq!(b.source.recv().await.unwrap(), None);

        assert!(matches!(
            a.sink.send(WireMessage::Text("late".into())).await,
            Err(Error::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_connector_without_listener() {
        let (connector, incoming) = MemoryConnector::new();
        drop(incoming);
        assert!(matches!(
            connector.connect("relay").await,
            Err(Error::TransportError(_))
        ));
    }
}
