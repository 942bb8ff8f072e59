use thiserror::Error;

/// clipsync error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Payload too large: {len} bytes (max {max} for this key)")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
