//! WebSocket relay
//!
//! Clients never talk to each other directly. Each one connects here,
//! announces its peer id, and then sends sync frames. The relay forwards the
//! ciphertext half of every frame to the connections that announced the
//! frame's recipient id. It never sees plaintext and keeps no history.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::transport::{ws_connection, Connection};
use crate::protocol::constants::{ACCEPT_ERROR_BACKOFF_MS, RELAY_CHANNEL_CAPACITY};
use crate::protocol::WireMessage;
use crate::{Error, Result};

/// Ciphertext addressed to one peer id
#[derive(Debug, Clone)]
struct Routed {
    recipient: String,
    payload: Vec<u8>,
}

/// Fan-out shared by all relay connections
#[derive(Debug, Clone)]
pub struct Router {
    tx: broadcast::Sender<Routed>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RELAY_CHANNEL_CAPACITY)
    }
}

impl Router {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Connections that have announced an id and are receiving
    pub fn connections(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Serve one client until either side closes
    pub async fn serve(&self, connection: Connection) -> Result<()> {
        let Connection {
            mut sink,
            mut source,
        } = connection;

        let id = match source.recv().await? {
            Some(WireMessage::Text(id)) => id,
            other => {
                tracing::warn!(
                    "connection did not announce an id (got {}), closing",
                    other.as_ref().map(WireMessage::kind).unwrap_or("end of stream")
                );
                sink.close().await?;
                return Ok(());
            }
        };

        let short: String = id.chars().take(12).collect();
        tracing::info!("client {} connected", short);
        let mut routed = self.tx.subscribe();
        // Recipient of the next binary message
        let mut pending: Option<String> = None;

        let result = loop {
            tokio::select! {
                inbound = source.recv() => match inbound {
                    Ok(Some(WireMessage::Text(recipient))) => {
                        if let Some(dropped) = pending.replace(recipient) {
                            tracing::warn!("{}: no ciphertext followed destination {}", short, dropped);
                        }
                    }
                    Ok(Some(WireMessage::Binary(payload))) => match pending.take() {
                        Some(recipient) => {
                            tracing::debug!("{}: routing {} bytes", short, payload.len());
                            let _ = self.tx.send(Routed { recipient, payload });
                        }
                        None => tracing::warn!("{}: ciphertext without destination, dropped", short),
                    },
                    Ok(None) | Err(Error::TransportClosed) => break Ok(()),
                    Err(e) => break Err(e),
                },
                outbound = routed.recv() => match outbound {
                    Ok(message) if message.recipient == id => {
                        if let Err(e) = sink.send(WireMessage::Binary(message.payload)).await {
                            break Err(e);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("{}: lagging, {} frames skipped", short, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                },
            }
        };

        tracing::info!("client {} disconnected", short);
        let _ = sink.close().await;
        result
    }
}

/// Relay server listening for WebSocket clients
pub struct Relay {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

impl Relay {
    /// Bind to `addr`, e.g. `0.0.0.0:5200`
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::TransportError(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        tracing::info!("relay listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            router: Router::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting connections in the background
    pub fn start(self) -> RelayHandle {
        let router = self.router.clone();
        let local_addr = self.local_addr;
        let task = tokio::spawn(accept_loop(self.listener, self.router));

        RelayHandle {
            task,
            local_addr,
            router,
        }
    }
}

/// Source of incoming TCP connections
#[async_trait]
trait Acceptor: Send + 'static {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

async fn accept_loop<A: Acceptor>(mut acceptor: A, router: Router) {
    loop {
        match acceptor.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!("incoming connection from {}", addr);
                let router = router.clone();

                tokio::spawn(async move {
                    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws_stream) => ws_stream,
                        Err(e) => {
                            tracing::warn!("websocket handshake with {} failed: {}", addr, e);
                            return;
                        }
                    };
                    if let Err(e) = router.serve(ws_connection(ws_stream)).await {
                        tracing::error!("connection error from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                // e.g. out of file descriptors; retrying at once would spin
                tracing::error!("accept error: {}", e);
                tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
            }
        }
    }
}

/// Handle to a running relay
pub struct RelayHandle {
    task: JoinHandle<()>,
    local_addr: SocketAddr,
    router: Router,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connections(&self) -> usize {
        self.router.connections()
    }

    /// Wait for the accept loop; it only ends when aborted
    pub async fn join(self) {
        let _ = self.task.await;
    }

    /// Stop accepting connections. Clients already connected keep being
    /// served until they disconnect.
    pub fn abort(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::clipboard::{ClipboardBridge, MemoryClipboard};
    use crate::crypto::{encode_public_key, test_keys};
    use crate::peers::PeerRegistry;
    use crate::sync::memory::pair;
    use crate::sync::session::{SessionEvent, SyncSession};
    use crate::sync::transport::{relay_url, WsConnector};

    const WAIT: Duration = Duration::from_secs(10);

    async fn wait_for_connections(count: usize, current: impl Fn() -> usize) {
        tokio::time::timeout(WAIT, async {
            while current() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("clients did not register");
    }

    async fn join(router: &Router, id: &str) -> Connection {
        let (mut client, server) = pair();
        let router = router.clone();
        tokio::spawn(async move { router.serve(server).await });
        client.sink.send(WireMessage::Text(id.into())).await.unwrap();
        client
    }

    async fn recv(client: &mut Connection) -> Option<WireMessage> {
        tokio::time::timeout(WAIT, client.source.recv())
            .await
            .expect("timed out")
            .unwrap()
    }

    async fn send_frame(client: &mut Connection, recipient: &str, payload: &[u8]) {
        client
            .sink
            .send(WireMessage::Text(recipient.into()))
            .await
            .unwrap();
        client
            .sink
            .send(WireMessage::Binary(payload.to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forwards_binary_to_recipient_only() {
        let router = Router::default();
        let mut a = join(&router, "aaaa").await;
        let mut b = join(&router, "bbbb").await;
        let mut c = join(&router, "cccc").await;
        wait_for_connections(3, || router.connections()).await;

        send_frame(&mut a, "bbbb", b"for b").await;
        send_frame(&mut a, "cccc", b"for c").await;

        assert_eq!(recv(&mut b).await, Some(WireMessage::Binary(b"for b".to_vec())));
        // c sees its own frame first, so nothing addressed to b leaked to it
        assert_eq!(recv(&mut c).await, Some(WireMessage::Binary(b"for c".to_vec())));
    }

    #[tokio::test]
    async fn test_same_id_on_two_connections() {
        let router = Router::default();
        let mut sender = join(&router, "sender").await;
        let mut first = join(&router, "phone").await;
        let mut second = join(&router, "phone").await;
        wait_for_connections(3, || router.connections()).await;

        send_frame(&mut sender, "phone", b"both").await;

        assert_eq!(recv(&mut first).await, Some(WireMessage::Binary(b"both".to_vec())));
        assert_eq!(recv(&mut second).await, Some(WireMessage::Binary(b"both".to_vec())));
    }

    #[tokio::test]
    async fn test_closes_connection_without_id() {
        let router = Router::default();
        let (mut client, server) = pair();
        let serving = tokio::spawn({
            let router = router.clone();
            async move { router.serve(server).await }
        });

        client.sink.send(WireMessage::Binary(vec![1, 2, 3])).await.unwrap();

        assert_eq!(recv(&mut client).await, None);
        serving.await.unwrap().unwrap();
        assert_eq!(router.connections(), 0);
    }

    #[tokio::test]
    async fn test_binary_without_destination_dropped() {
        let router = Router::default();
        let mut a = join(&router, "aaaa").await;
        let mut b = join(&router, "bbbb").await;
        wait_for_connections(2, || router.connections()).await;

        a.sink.send(WireMessage::Binary(b"orphan".to_vec())).await.unwrap();
        send_frame(&mut a, "bbbb", b"addressed").await;

        assert_eq!(recv(&mut b).await, Some(WireMessage::Binary(b"addressed".to_vec())));
    }

    #[tokio::test]
    async fn test_disconnect_unsubscribes() {
        let router = Router::default();
        let a = join(&router, "aaaa").await;
        wait_for_connections(1, || router.connections()).await;

        drop(a);
        tokio::time::timeout(WAIT, async {
            while router.connections() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    struct FailingAcceptor {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Acceptor for FailingAcceptor {
        async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::other("too many open files"))
        }
    }

    #[tokio::test]
    async fn test_accept_errors_back_off() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(accept_loop(
            FailingAcceptor {
                calls: calls.clone(),
            },
            Router::default(),
        ));

        tokio::time::sleep(Duration::from_millis(350)).await;
        task.abort();

        let attempts = calls.load(Ordering::SeqCst);
        assert!(attempts >= 1);
        assert!(attempts <= 5, "accept retried {} times", attempts);
    }

    #[tokio::test]
    async fn test_abort_keeps_connected_clients() {
        let relay = Relay::bind("127.0.0.1:0").await.unwrap();
        let url = relay_url(&relay.local_addr().to_string());
        let handle = relay.start();

        let mut clients = Vec::new();
        for id in ["aaaa", "bbbb"] {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
            let mut client = ws_connection(ws_stream);
            client.sink.send(WireMessage::Text(id.into())).await.unwrap();
            clients.push(client);
        }
        let router = handle.router.clone();
        wait_for_connections(2, || router.connections()).await;
        handle.abort();

        let mut b = clients.pop().unwrap();
        let mut a = clients.pop().unwrap();
        send_frame(&mut a, "bbbb", b"after abort").await;
        assert_eq!(recv(&mut b).await, Some(WireMessage::Binary(b"after abort".to_vec())));
    }

    #[tokio::test]
    async fn test_sessions_sync_through_websocket_relay() {
        let relay = Relay::bind("127.0.0.1:0").await.unwrap().start();
        let address = relay.local_addr().to_string();

        let alice = test_keys::alice();
        let bob = test_keys::bob();

        let mut alice_peers = PeerRegistry::new();
        alice_peers
            .add_peer(&encode_public_key(bob.public_key()).unwrap())
            .unwrap();
        let mut bob_peers = PeerRegistry::new();
        bob_peers
            .add_peer(&encode_public_key(alice.public_key()).unwrap())
            .unwrap();

        let alice_clipboard = Arc::new(MemoryClipboard::new());
        let bob_clipboard = Arc::new(MemoryClipboard::new());

        let alice_session = SyncSession::new(
            address.clone(),
            alice,
            alice_peers,
            alice_clipboard.clone(),
            Arc::new(WsConnector::new()),
        )
        .unwrap();
        let bob_session = SyncSession::new(
            address,
            bob,
            bob_peers,
            bob_clipboard.clone(),
            Arc::new(WsConnector::new()),
        )
        .unwrap();
        let mut bob_events = bob_session.subscribe_events();

        alice_session.start().await.unwrap();
        bob_session.start().await.unwrap();
        wait_for_connections(2, || relay.connections()).await;

        alice_clipboard.write_current("over the wire").unwrap();

        tokio::time::timeout(WAIT, async {
            loop {
                if let SessionEvent::ClipboardReceived { .. } = bob_events.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await
        .expect("bob never received the update");

        assert_eq!(
            bob_clipboard.read_current().unwrap().as_deref(),
            Some("over the wire")
        );
        // Bob applied it without echoing it back to alice
        assert_eq!(alice_clipboard.writes(), vec!["over the wire"]);

        alice_session.stop().await;
        bob_session.stop().await;
        relay.abort();
    }
}
