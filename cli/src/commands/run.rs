//! Run command implementation.

use std::sync::Arc;

use clipsync_core::sync::CloseReason;
use clipsync_core::{
    Config, FileIdentity, IdentityProvider, PeerRegistry, SessionEvent, SessionState,
    SyncSession, SystemClipboard, WsConnector,
};
use tokio::sync::broadcast::error::RecvError;

use crate::ui::print_banner;

/// Sync the clipboard until Ctrl+C or the relay goes away.
pub async fn run_sync(config: Config) -> anyhow::Result<()> {
    print_banner();

    let key_pair = FileIdentity::new(&config.client_key).get_key_pair()?;
    let registry = PeerRegistry::from_key_files(&config.peers_keys)?;

    println!("\x1b[1mPeer ID:\x1b[0m {}", key_pair.peer_id()?);
    println!("\x1b[1mRelay:\x1b[0m   {}", config.relay);
    if registry.is_empty() {
        println!("\x1b[1;33m!\x1b[0m No peer keys configured; changes will not be sent anywhere.");
    } else {
        println!("\x1b[1mPeers:\x1b[0m");
        for id in registry.list_peer_ids() {
            println!("  • {}", id);
        }
    }
    println!();

    let session = SyncSession::new(
        config.relay.clone(),
        key_pair,
        registry,
        Arc::new(SystemClipboard::new(config.poll_interval())),
        Arc::new(WsConnector::new()),
    )?;
    let mut events = session.subscribe_events();
    let mut shutdown = super::ctrl_c()?;

    session.start().await?;
    println!("\x1b[1;32m✓\x1b[0m Syncing clipboard changes...");
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Closed(reason)) => return closed(reason),
                Ok(event) => handle_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("{} session events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.recv() => {
                println!("\n\x1b[1;33mShutting down...\x1b[0m");
                session.stop().await;
                break;
            }
        }
    }

    Ok(())
}

fn closed(reason: CloseReason) -> anyhow::Result<()> {
    match reason {
        CloseReason::Stopped => Ok(()),
        CloseReason::TransportClosed => anyhow::bail!("relay closed the connection"),
        CloseReason::TransportError(e) => anyhow::bail!("connection to relay failed: {}", e),
    }
}

/// Print a session event.
fn handle_event(event: SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => {
            if state == SessionState::Syncing {
                println!("\x1b[1;32m⬤\x1b[0m Connected to relay");
            }
        }
        SessionEvent::ClipboardSent { sent_to, failed } => {
            if !sent_to.is_empty() {
                println!("\x1b[1;34m📤\x1b[0m Sent to {} peer(s)", sent_to.len());
            }
            for (peer, reason) in failed {
                eprintln!("\x1b[1;31m✗\x1b[0m Not sent to {}: {}", peer.short(), reason);
            }
        }
        SessionEvent::ClipboardReceived { len } => {
            println!("\x1b[1;34m📋\x1b[0m Received clipboard ({} bytes)", len);
        }
        SessionEvent::FrameDiscarded { reason } => {
            eprintln!("\x1b[1;31m✗\x1b[0m Discarded message: {}", reason);
        }
        SessionEvent::Closed(_) => {}
    }
}
