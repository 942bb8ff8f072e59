//! Relay command implementation.

use clipsync_core::Relay;

/// Run the relay until Ctrl+C.
pub async fn run_relay(listen: String) -> anyhow::Result<()> {
    let relay = Relay::bind(&listen).await?;
    let handle = relay.start();
    let mut shutdown = super::ctrl_c()?;

    println!(
        "\x1b[1;32m✓\x1b[0m Relay listening on \x1b[1m{}\x1b[0m",
        handle.local_addr()
    );
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    shutdown.recv().await;
    println!("\n\x1b[1;33mShutting down...\x1b[0m");
    handle.abort();

    Ok(())
}
