//! Configuration loading
//!
//! Settings come from `config.toml` in the user config directory
//! (`~/.config/clipboard-sync/` on Linux). Every key is optional; the CLI
//! overrides individual values with its flags.
//!
//! ```toml
//! relay = "relay.example.net:5200"
//! client_key = "client_key.pem"
//! peers_keys = ["phone.pem", "laptop.pem"]
//! poll_interval_ms = 500
//! listen = "0.0.0.0:5200"
//! ```
//!
//! Relative key paths are resolved against the directory holding the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::constants::{
    CLIPBOARD_POLL_INTERVAL_MS, CONFIG_DIR_NAME, DEFAULT_RELAY, DEFAULT_RELAY_LISTEN,
};
use crate::{Error, Result};

const CONFIG_FILE_NAME: &str = "config.toml";
const CLIENT_KEY_FILE_NAME: &str = "client_key.pem";

/// Settings for a client and for the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Relay address, `host:port` or a `ws://`/`wss://` URL
    pub relay: String,
    /// PKCS#8 PEM private key of this device
    pub client_key: PathBuf,
    /// Public key files of trusted peers
    pub peers_keys: Vec<PathBuf>,
    pub poll_interval_ms: u64,
    /// Address the relay binds to
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: DEFAULT_RELAY.to_string(),
            client_key: config_dir().join(CLIENT_KEY_FILE_NAME),
            peers_keys: Vec::new(),
            poll_interval_ms: CLIPBOARD_POLL_INTERVAL_MS,
            listen: DEFAULT_RELAY_LISTEN.to_string(),
        }
    }
}

/// `<user config dir>/clipboard-sync`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Location of the config file when `--config` is not given
pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    tracing::debug!("no config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text; paths are left as written
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.relay.trim().is_empty() {
            return Err(Error::Config("relay address is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.client_key.is_relative() {
            self.client_key = base.join(&self.client_key);
        }
        for path in &mut self.peers_keys {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}
