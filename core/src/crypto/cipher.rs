//! Asymmetric encryption of clipboard payloads using RSA PKCS#1 v1.5

use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use super::keys::{KeyPair, PeerId};
use crate::{Error, Result};

/// Bytes of PKCS#1 v1.5 padding in every encrypted block
pub const PKCS1_V15_OVERHEAD: usize = 11;

/// Encrypts for recipients and decrypts with our own private key.
///
/// There is no chunking: a payload must fit in a single RSA block.
#[derive(Clone)]
pub struct CipherService {
    key_pair: Arc<KeyPair>,
    peer_id: PeerId,
}

impl std::fmt::Debug for CipherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherService")
            .field("peer_id", &self.peer_id.as_str())
            .finish_non_exhaustive()
    }
}

impl CipherService {
    pub fn new(key_pair: Arc<KeyPair>) -> Result<Self> {
        let peer_id = key_pair.peer_id()?;
        Ok(Self { key_pair, peer_id })
    }

    /// Peer id of the key pair this service decrypts for
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn key_pair(&self) -> &Arc<KeyPair> {
        &self.key_pair
    }

    /// Largest plaintext a single block under `key` can carry
    pub fn max_plaintext_len(key: &RsaPublicKey) -> usize {
        key.size().saturating_sub(PKCS1_V15_OVERHEAD)
    }

    /// Encrypt `plaintext` for the holder of `recipient`
    pub fn encrypt(plaintext: &[u8], recipient: &RsaPublicKey) -> Result<Vec<u8>> {
        let max = Self::max_plaintext_len(recipient);
        if plaintext.len() > max {
            return Err(Error::PayloadTooLarge {
                len: plaintext.len(),
                max,
            });
        }

        recipient
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| Error::EncryptionFailed(e.to_string()))
    }

    /// Decrypt a ciphertext addressed to us
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.key_pair
            .private_key()
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| Error::DecryptionFailed(e.to_string()))
    }

    /// Decrypt and interpret the payload as clipboard text
    pub fn decrypt_text(&self, ciphertext: &[u8]) -> Result<String> {
        let plaintext = self.decrypt(ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::DecryptionFailed("plaintext is not valid UTF-8".to_string()))
    }
}
