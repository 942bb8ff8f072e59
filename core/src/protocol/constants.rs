//! Centralized protocol constants
//!
//! All protocol-level constants are defined here to ensure consistency
//! across the codebase and make configuration easier.

/// Relay address used when none is configured
pub const DEFAULT_RELAY: &str = "127.0.0.1:5200";

/// Address the relay listens on by default
pub const DEFAULT_RELAY_LISTEN: &str = "0.0.0.0:5200";

/// RSA modulus size for newly generated device keys
pub const KEY_BITS: usize = 2048;

/// Clipboard polling interval in milliseconds
pub const CLIPBOARD_POLL_INTERVAL_MS: u64 = 500;

/// Pending frames per relay subscriber before slow receivers start lagging
pub const RELAY_CHANNEL_CAPACITY: usize = 64;

/// Session events buffered for slow subscribers
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Directory under the user config dir holding config and keys
pub const CONFIG_DIR_NAME: &str = "clipboard-sync";

/// How long `stop` lets queued frames flush before dropping them
pub const SHUTDOWN_DRAIN_TIMEOUT_MS: u64 = 2000;

/// Pause after a failed accept so a persistent error does not spin the relay
pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;
