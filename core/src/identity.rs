//! Device identity providers
//!
//! The sync core never stores keys itself; it asks an [`IdentityProvider`]
//! for the current key pair when a session starts.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::crypto::KeyPair;
use crate::protocol::constants::KEY_BITS;
use crate::{Error, Result};

/// Source of this device's key pair
pub trait IdentityProvider: Send + Sync {
    /// Return the existing key pair, creating one if none exists
    fn get_key_pair(&self) -> Result<KeyPair>;

    /// Replace the key pair. The old peer id stops being valid.
    fn regenerate_key_pair(&self) -> Result<KeyPair>;
}

/// Key pair persisted as a PKCS#8 PEM file
#[derive(Debug, Clone)]
pub struct FileIdentity {
    path: PathBuf,
    bits: usize,
}

impl FileIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bits: KEY_BITS,
        }
    }

    /// Override the modulus size used when a key has to be generated
    pub fn with_bits(mut self, bits: usize) -> Self {
        self.bits = bits;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn generate_and_store(&self) -> Result<KeyPair> {
        tracing::info!("generating {}-bit key pair at {}", self.bits, self.path.display());
        let pair = KeyPair::generate(self.bits)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_private(&self.path, &pair.to_pkcs8_pem()?)?;

        Ok(pair)
    }
}

impl IdentityProvider for FileIdentity {
    fn get_key_pair(&self) -> Result<KeyPair> {
        match std::fs::read_to_string(&self.path) {
            Ok(pem) => KeyPair::from_pkcs8_pem(&pem).map_err(|e| {
                Error::InvalidKeyMaterial(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.generate_and_store(),
            Err(e) => Err(e.into()),
        }
    }

    fn regenerate_key_pair(&self) -> Result<KeyPair> {
        self.generate_and_store()
    }
}

/// Write a secret readable only by the owner
fn write_private(path: &Path, contents: &str) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // The mode above only applies to newly created files
    restrict_permissions(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// In-process identity that never touches disk
#[derive(Debug)]
pub struct MemoryIdentity {
    bits: usize,
    current: Mutex<Option<KeyPair>>,
}

impl MemoryIdentity {
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            current: Mutex::new(None),
        }
    }

    /// Start from an existing key pair
    pub fn with_key_pair(pair: KeyPair) -> Self {
        Self {
            bits: KEY_BITS,
            current: Mutex::new(Some(pair)),
        }
    }
}

impl IdentityProvider for MemoryIdentity {
    fn get_key_pair(&self) -> Result<KeyPair> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pair) = current.as_ref() {
            return Ok(pair.clone());
        }
        let pair = KeyPair::generate(self.bits)?;
        *current = Some(pair.clone());
        Ok(pair)
    }

    fn regenerate_key_pair(&self) -> Result<KeyPair> {
        let pair = KeyPair::generate(self.bits)?;
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(pair.clone());
        Ok(pair)
    }
}
