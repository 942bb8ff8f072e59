//! Key management commands.

use std::path::Path;

use anyhow::Context;
use clipsync_core::crypto::{derive_peer_id, parse_public_key_text};
use clipsync_core::{Config, FileIdentity, IdentityProvider};

/// Generate a fresh key pair, replacing the stored one.
pub fn regenerate_key(config: &Config) -> anyhow::Result<()> {
    let identity = FileIdentity::new(&config.client_key);
    let key_pair = identity.regenerate_key_pair()?;

    println!("\x1b[1;32m✓\x1b[0m New key written to {}", identity.path().display());
    println!("\x1b[1mPeer ID:\x1b[0m {}", key_pair.peer_id()?);
    println!("\x1b[2mPeers need the new public key before they can send to this device.\x1b[0m");
    Ok(())
}

/// Print the peer id a public key file maps to.
pub fn print_peer_id(file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let der = parse_public_key_text(&text)
        .with_context(|| format!("{} is not a public key", file.display()))?;
    println!("{}", derive_peer_id(&der));
    Ok(())
}
