//! CLI command implementations.

mod info;
mod keys;
mod relay;
mod run;

pub use info::show_info;
pub use keys::{print_peer_id, regenerate_key};
pub use relay::run_relay;
pub use run::run_sync;

/// Channel that yields once on Ctrl+C
fn ctrl_c() -> anyhow::Result<tokio::sync::mpsc::Receiver<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;
    Ok(rx)
}
