//! Info command implementation.

use clipsync_core::crypto::{public_key_to_base64, public_key_to_pem};
use clipsync_core::{Config, FileIdentity, IdentityProvider, PeerRegistry};

use crate::ui::print_qr_code;

/// Display this device's identity and configured peers.
pub fn show_info(config: &Config, qr: bool) -> anyhow::Result<()> {
    let key_pair = FileIdentity::new(&config.client_key).get_key_pair()?;

    println!("\n\x1b[1mclipsync Device Info\x1b[0m");
    println!("═══════════════════════════════════════");
    println!("\x1b[1mPeer ID:\x1b[0m  {}", key_pair.peer_id()?);
    println!("\x1b[1mKey file:\x1b[0m {}", config.client_key.display());
    println!("\x1b[1mRelay:\x1b[0m    {}", config.relay);

    match PeerRegistry::from_key_files(&config.peers_keys) {
        Ok(registry) => {
            println!("\n\x1b[1mPeers ({}):\x1b[0m", registry.len());
            for id in registry.list_peer_ids() {
                println!("  • {}", id);
            }
        }
        Err(e) => eprintln!("\n\x1b[1;31m✗\x1b[0m Could not load peer keys: {}", e),
    }

    println!("\n\x1b[1mPublic key:\x1b[0m");
    print!("{}", public_key_to_pem(key_pair.public_key())?);

    if qr {
        println!("\n\x1b[1;33mScan this QR code with the mobile app to add this device:\x1b[0m\n");
        print_qr_code(&public_key_to_base64(key_pair.public_key())?);
    }
    println!();

    Ok(())
}
