//! Clipboard sync session
//!
//! A session owns one relay connection. After announcing our peer id it
//! runs three tasks until the connection ends or [`SyncSession::stop`] is
//! called:
//!
//! - outbound: local clipboard changes are encrypted for every peer and
//!   queued as sync frames
//! - writer: the only task touching the transport's write half, so the two
//!   messages of a sync frame are never interleaved with another frame
//! - inbound: binary messages are decrypted and applied to the clipboard
//!
//! Both directions share one [`Snapshot`] of the last known clipboard text.
//! A value is recorded there before it is written to the clipboard, so the
//! change notification that write triggers is recognised and not sent back
//! out.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::transport::{Connection, Connector, MessageSink, MessageSource};
use crate::clipboard::{ClipboardBridge, Subscription};
use crate::crypto::{CipherService, KeyPair, PeerId};
use crate::peers::PeerRegistry;
use crate::protocol::constants::{EVENT_CHANNEL_CAPACITY, SHUTDOWN_DRAIN_TIMEOUT_MS};
use crate::protocol::{Frame, WireMessage};
use crate::{Error, Result};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Announced,
    Syncing,
    Closing,
}

/// Why a session left `Syncing`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `stop` was called
    Stopped,
    /// The relay closed the connection
    TransportClosed,
    /// The connection failed
    TransportError(String),
}

/// Events emitted by a running session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A local change was queued for `sent_to`; `failed` could not be
    /// encrypted for
    ClipboardSent {
        sent_to: Vec<PeerId>,
        failed: Vec<(PeerId, String)>,
    },
    /// A peer's update was written to the clipboard
    ClipboardReceived { len: usize },
    /// An inbound message was dropped
    FrameDiscarded { reason: String },
    Closed(CloseReason),
}

/// What the inbound path did with one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Applied,
    /// Decrypted value matched the snapshot
    Unchanged,
    /// Not a ciphertext message
    Ignored,
}

/// Last clipboard text seen by either direction
#[derive(Debug, Default)]
pub struct Snapshot {
    value: Mutex<String>,
}

impl Snapshot {
    pub fn new(initial: String) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    /// Store `value` if it differs from the current one; `true` if stored
    pub fn replace_if_changed(&self, value: &str) -> bool {
        let mut current = self.value.lock().unwrap_or_else(|e| e.into_inner());
        if *current == value {
            false
        } else {
            *current = value.to_string();
            true
        }
    }

    /// Like `replace_if_changed`, returning the value it replaced
    pub fn exchange_if_changed(&self, value: &str) -> Option<String> {
        let mut current = self.value.lock().unwrap_or_else(|e| e.into_inner());
        if *current == value {
            None
        } else {
            Some(std::mem::replace(&mut *current, value.to_string()))
        }
    }

    /// Put `previous` back, unless something replaced `expected` meanwhile
    pub fn restore(&self, expected: &str, previous: String) -> bool {
        let mut current = self.value.lock().unwrap_or_else(|e| e.into_inner());
        if *current == expected {
            *current = previous;
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> String {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// State shared by the tasks of one connection
struct Shared {
    cipher: CipherService,
    clipboard: Arc<dyn ClipboardBridge>,
    registry: Arc<RwLock<PeerRegistry>>,
    snapshot: Snapshot,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn apply_inbound(&self, message: WireMessage) -> Result<InboundOutcome> {
        let ciphertext = match message {
            WireMessage::Binary(data) => data,
            WireMessage::Text(text) => {
                tracing::debug!("ignoring text message of {} bytes", text.len());
                return Ok(InboundOutcome::Ignored);
            }
        };

        let text = self.cipher.decrypt_text(&ciphertext)?;
        let previous = match self.snapshot.exchange_if_changed(&text) {
            Some(previous) => previous,
            None => {
                tracing::debug!("received clipboard matches current, not applying");
                return Ok(InboundOutcome::Unchanged);
            }
        };

        // The clipboard still holds the old value if the write fails
        if let Err(e) = self.clipboard.write_current(&text) {
            self.snapshot.restore(&text, previous);
            return Err(e);
        }
        tracing::info!("applied clipboard update ({} bytes)", text.len());
        let _ = self
            .events
            .send(SessionEvent::ClipboardReceived { len: text.len() });
        Ok(InboundOutcome::Applied)
    }

    fn encrypt_change(&self, text: &str) -> (Vec<Frame>, SessionEvent) {
        let ciphertexts = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .encrypt_for_all(text.as_bytes());

        let mut frames = Vec::with_capacity(ciphertexts.len());
        let mut sent_to = Vec::new();
        let mut failed = Vec::new();
        for (peer, result) in ciphertexts {
            match result {
                Ok(ciphertext) => {
                    sent_to.push(peer.clone());
                    frames.push(Frame::Sync {
                        recipient: peer,
                        ciphertext,
                    });
                }
                Err(e) => {
                    tracing::warn!("failed to encrypt clipboard for {}: {}", peer.short(), e);
                    failed.push((peer, e.to_string()));
                }
            }
        }

        (frames, SessionEvent::ClipboardSent { sent_to, failed })
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    supervisor: JoinHandle<CloseReason>,
}

struct Tasks {
    subscription: Subscription,
    outbound: JoinHandle<()>,
    writer: JoinHandle<Result<()>>,
    inbound: JoinHandle<CloseReason>,
}

#[derive(Clone)]
struct Identity {
    key_pair: Arc<KeyPair>,
    peer_id: PeerId,
}

/// Encrypted clipboard sync over one relay connection
pub struct SyncSession {
    relay: String,
    connector: Arc<dyn Connector>,
    clipboard: Arc<dyn ClipboardBridge>,
    registry: Arc<RwLock<PeerRegistry>>,
    identity: Mutex<Identity>,
    state: Arc<watch::Sender<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    last_close: Arc<Mutex<Option<CloseReason>>>,
    drain_timeout: Duration,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl SyncSession {
    pub fn new(
        relay: impl Into<String>,
        key_pair: KeyPair,
        registry: PeerRegistry,
        clipboard: Arc<dyn ClipboardBridge>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let peer_id = key_pair.peer_id()?;
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            relay: relay.into(),
            connector,
            clipboard,
            registry: Arc::new(RwLock::new(registry)),
            identity: Mutex::new(Identity {
                key_pair: Arc::new(key_pair),
                peer_id,
            }),
            state: Arc::new(state),
            events,
            last_close: Arc::new(Mutex::new(None)),
            drain_timeout: Duration::from_millis(SHUTDOWN_DRAIN_TIMEOUT_MS),
            running: tokio::sync::Mutex::new(None),
        })
    }

    /// Bound on flushing queued frames during `stop`
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Our peer id, as announced on connect
    pub fn peer_id(&self) -> PeerId {
        self.identity().peer_id
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    /// Shared handle to the peer registry; changes apply to the next broadcast
    pub fn registry(&self) -> Arc<RwLock<PeerRegistry>> {
        self.registry.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Reason the most recent connection ended
    pub fn last_close_reason(&self) -> Option<CloseReason> {
        self.last_close.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap the key pair, e.g. after regeneration. Only allowed while
    /// disconnected; the new peer id is announced on the next `start`.
    pub fn set_key_pair(&self, key_pair: KeyPair) -> Result<()> {
        if self.state() != SessionState::Disconnected {
            return Err(Error::InvalidState(
                "key pair can only be replaced while disconnected".to_string(),
            ));
        }
        let peer_id = key_pair.peer_id()?;
        *self.identity.lock().unwrap_or_else(|e| e.into_inner()) = Identity {
            key_pair: Arc::new(key_pair),
            peer_id,
        };
        Ok(())
    }

    fn identity(&self) -> Identity {
        self.identity.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: SessionState) {
        publish_state(&self.state, &self.events, state);
    }

    /// Connect, announce our peer id and start syncing.
    ///
    /// Returns once the session is `Syncing`. On failure the session is
    /// back in `Disconnected`.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(active) = running.as_ref() {
            if !active.supervisor.is_finished() {
                return Err(Error::InvalidState("session already running".to_string()));
            }
        }
        if let Some(finished) = running.take() {
            let _ = finished.supervisor.await;
        }

        let identity = self.identity();
        let cipher = CipherService::new(identity.key_pair.clone())?;

        self.set_state(SessionState::Connecting);
        let Connection { mut sink, source } = match self.connector.connect(&self.relay).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("failed to connect to relay {}: {}", self.relay, e);
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        if let Err(e) = send_frame(sink.as_mut(), Frame::Identity(identity.peer_id.clone())).await {
            tracing::error!("failed to announce peer id: {}", e);
            let _ = sink.close().await;
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }
        tracing::info!("announced as {}", identity.peer_id);
        self.set_state(SessionState::Announced);

        let initial = match self.clipboard.read_current() {
            Ok(text) => text.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("could not read clipboard at start: {}", e);
                String::new()
            }
        };
        let shared = Arc::new(Shared {
            cipher,
            clipboard: self.clipboard.clone(),
            registry: self.registry.clone(),
            snapshot: Snapshot::new(initial),
            events: self.events.clone(),
        });

        let (local_tx, local_rx) = mpsc::unbounded_channel::<String>();
        let subscription = match self.clipboard.subscribe(Box::new(move |text| {
            let _ = local_tx.send(text);
        })) {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!("failed to watch clipboard: {}", e);
                let _ = sink.close().await;
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        self.set_state(SessionState::Syncing);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Frame>();
        let tasks = Tasks {
            subscription,
            outbound: tokio::spawn(outbound_loop(shared.clone(), local_rx, frames_tx)),
            writer: tokio::spawn(write_loop(sink, frames_rx)),
            inbound: tokio::spawn(inbound_loop(shared, source)),
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            tasks,
            shutdown_rx,
            self.state.clone(),
            self.events.clone(),
            self.last_close.clone(),
            self.drain_timeout,
        ));

        *running = Some(Running {
            shutdown,
            supervisor,
        });
        Ok(())
    }

    /// Stop syncing and close the connection. Queued frames are flushed on
    /// a best-effort basis, for at most the drain timeout. Returns `None` if
    /// the session was not started.
    pub async fn stop(&self) -> Option<CloseReason> {
        let running = self.running.lock().await.take()?;
        let _ = running.shutdown.send(());
        running.supervisor.await.ok()
    }

    /// Wait until the session is `Disconnected` again
    pub async fn wait_closed(&self) -> Option<CloseReason> {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|s| *s == SessionState::Disconnected)
            .await;
        self.last_close_reason()
    }
}

fn publish_state(
    state: &watch::Sender<SessionState>,
    events: &broadcast::Sender<SessionEvent>,
    new: SessionState,
) {
    let old = state.send_replace(new);
    if old != new {
        tracing::debug!("session state {:?} -> {:?}", old, new);
        let _ = events.send(SessionEvent::StateChanged(new));
    }
}

async fn send_frame(sink: &mut dyn MessageSink, frame: Frame) -> Result<()> {
    for message in frame.into_messages() {
        sink.send(message).await?;
    }
    Ok(())
}

async fn outbound_loop(
    shared: Arc<Shared>,
    mut changes: mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<Frame>,
) {
    while let Some(text) = changes.recv().await {
        if !shared.snapshot.replace_if_changed(&text) {
            tracing::debug!("clipboard change matches last synced value, skipping");
            continue;
        }

        let (queued, event) = shared.encrypt_change(&text);
        tracing::debug!("broadcasting clipboard to {} peer(s)", queued.len());
        for frame in queued {
            if frames.send(frame).is_err() {
                return;
            }
        }
        let _ = shared.events.send(event);
    }
}

async fn write_loop(
    mut sink: Box<dyn MessageSink>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
) -> Result<()> {
    while let Some(frame) = frames.recv().await {
        send_frame(sink.as_mut(), frame).await?;
    }
    sink.close().await
}

async fn inbound_loop(shared: Arc<Shared>, mut source: Box<dyn MessageSource>) -> CloseReason {
    loop {
        match source.recv().await {
            Ok(Some(message)) => {
                if let Err(e) = shared.apply_inbound(message) {
                    tracing::warn!("discarding inbound frame: {}", e);
                    let _ = shared.events.send(SessionEvent::FrameDiscarded {
                        reason: e.to_string(),
                    });
                }
            }
            Ok(None) | Err(Error::TransportClosed) => return CloseReason::TransportClosed,
            Err(e) => return CloseReason::TransportError(e.to_string()),
        }
    }
}

async fn supervise(
    mut tasks: Tasks,
    shutdown: oneshot::Receiver<()>,
    state: Arc<watch::Sender<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    last_close: Arc<Mutex<Option<CloseReason>>>,
    drain_timeout: Duration,
) -> CloseReason {
    let mut writer_done = false;
    let mut inbound_done = false;

    let reason = tokio::select! {
        _ = shutdown => CloseReason::Stopped,
        result = &mut tasks.inbound => {
            inbound_done = true;
            result.unwrap_or_else(|e| CloseReason::TransportError(e.to_string()))
        }
        result = &mut tasks.writer => {
            writer_done = true;
            match result {
                Ok(Ok(())) | Ok(Err(Error::TransportClosed)) => CloseReason::TransportClosed,
                Ok(Err(e)) => CloseReason::TransportError(e.to_string()),
                Err(e) => CloseReason::TransportError(e.to_string()),
            }
        }
    };

    match &reason {
        CloseReason::TransportError(e) => tracing::error!("session ended: {}", e),
        other => tracing::info!("session ending: {:?}", other),
    }
    publish_state(&state, &events, SessionState::Closing);

    // No clipboard callbacks run after this point
    tasks.subscription.cancel();
    tasks.outbound.abort();
    if !inbound_done {
        tasks.inbound.abort();
    }

    if !writer_done {
        if reason == CloseReason::Stopped {
            // The writer drains what was queued, then closes the connection
            if tokio::time::timeout(drain_timeout, &mut tasks.writer).await.is_err() {
                tracing::warn!("relay not accepting writes, dropping queued frames");
                tasks.writer.abort();
            }
        } else {
            tasks.writer.abort();
        }
    }

    *last_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.clone());
    publish_state(&state, &events, SessionState::Disconnected);
    let _ = events.send(SessionEvent::Closed(reason.clone()));
    reason
}
