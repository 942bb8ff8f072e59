//! clipsync core - end-to-end encrypted clipboard sync
//!
//! Devices share clipboard text through a relay that only ever sees
//! ciphertext. Every device owns an RSA key pair; its peer id is the
//! SHA-256 of its public key. A local change is encrypted separately for
//! each trusted peer and sent as a (recipient id, ciphertext) frame, and
//! the relay forwards the ciphertext to whoever announced that id.

pub mod clipboard;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod peers;
pub mod protocol;
pub mod sync;

mod error;

pub use error::{Error, Result};

// Re-export key types for convenience
pub use clipboard::{ClipboardBridge, MemoryClipboard, Subscription, SystemClipboard};
pub use config::Config;
pub use crypto::{CipherService, KeyPair, PeerId, PublicKey};
pub use identity::{FileIdentity, IdentityProvider, MemoryIdentity};
pub use peers::PeerRegistry;
pub use sync::{CloseReason, Relay, SessionEvent, SessionState, SyncSession, WsConnector};
