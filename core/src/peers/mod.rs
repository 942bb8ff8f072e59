//! Registry of trusted peers and their public keys

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::crypto::{
    decode_public_key, parse_public_key_text, peer_id_of, CipherService, PeerId, PublicKey,
};
use crate::{Error, Result};

/// Per-peer result of a broadcast encryption
pub type PeerCiphertexts = BTreeMap<PeerId, Result<Vec<u8>>>;

/// Peers we encrypt clipboard updates for, keyed by peer id
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PublicKey>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a registry from PEM public key files
    pub fn from_key_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut registry = Self::new();
        registry.load_key_files(paths)?;
        Ok(registry)
    }

    /// Add every key in `paths`, stopping at the first unreadable or invalid file
    pub fn load_key_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<Vec<PeerId>> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)?;
            let id = self.add_peer_text(&text).map_err(|e| match e {
                Error::InvalidKeyMaterial(msg) => {
                    Error::InvalidKeyMaterial(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })?;
            tracing::debug!("loaded peer {} from {}", id.short(), path.display());
            ids.push(id);
        }
        Ok(ids)
    }

    /// Add a peer from canonical DER key bytes.
    ///
    /// Re-adding the same key replaces the entry, so the call is idempotent.
    pub fn add_peer(&mut self, raw_key_bytes: &[u8]) -> Result<PeerId> {
        let key = decode_public_key(raw_key_bytes)?;
        // Hash the re-encoded key so equivalent encodings share one id
        let id = peer_id_of(&key)?;
        if self.peers.insert(id.clone(), key).is_none() {
            tracing::info!("added peer {}", id.short());
        }
        Ok(id)
    }

    /// Add a peer from a PEM block or bare base64 key
    pub fn add_peer_text(&mut self, text: &str) -> Result<PeerId> {
        let der = parse_public_key_text(text)?;
        self.add_peer(&der)
    }

    /// Remove a peer, returning its key if it was registered
    pub fn remove_peer(&mut self, id: &PeerId) -> Option<PublicKey> {
        let removed = self.peers.remove(id);
        if removed.is_some() {
            tracing::info!("removed peer {}", id.short());
        }
        removed
    }

    pub fn list_peer_ids(&self) -> BTreeSet<PeerId> {
        self.peers.keys().cloned().collect()
    }

    pub fn get_public_key(&self, id: &PeerId) -> Option<&PublicKey> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Encrypt `plaintext` independently for every registered peer.
    ///
    /// A failure for one peer is recorded in that peer's entry and does not
    /// affect the others.
    pub fn encrypt_for_all(&self, plaintext: &[u8]) -> PeerCiphertexts {
        self.peers
            .iter()
            .map(|(id, key)| (id.clone(), CipherService::encrypt(plaintext, key)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;
    use crate::crypto::{derive_peer_id, encode_public_key, public_key_to_pem, test_keys, KeyPair};

    fn der(pair: &KeyPair) -> Vec<u8> {
        encode_public_key(pair.public_key()).unwrap()
    }

    #[test]
    fn test_add_returns_peer_id() {
        let mut registry = PeerRegistry::new();
        let alice = test_keys::alice();

        let id = registry.add_peer(&der(&alice)).unwrap();

        assert_eq!(id, alice.peer_id().unwrap());
        assert_eq!(registry.get_public_key(&id), Some(alice.public_key()));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = PeerRegistry::new();
        let bytes = der(&test_keys::alice());

        let first = registry.add_peer(&bytes).unwrap();
        let second = registry.add_peer(&bytes).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut registry = PeerRegistry::new();
        assert!(matches!(
            registry.add_peer(b"garbage"),
            Err(Error::InvalidKeyMaterial(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_absent_is_none() {
        let mut registry = PeerRegistry::new();
        let id = derive_peer_id(b"nobody");
        assert!(registry.remove_peer(&id).is_none());

        let alice = registry.add_peer(&der(&test_keys::alice())).unwrap();
        assert!(registry.remove_peer(&alice).is_some());
        assert!(registry.remove_peer(&alice).is_none());
        assert!(registry.list_peer_ids().is_empty());
    }

    #[test]
    fn test_encrypt_for_all_each_peer_decrypts() {
        let mut registry = PeerRegistry::new();
        let alice = test_keys::alice();
        let bob = test_keys::bob();
        registry.add_peer(&der(&alice)).unwrap();
        registry.add_peer(&der(&bob)).unwrap();

        let out = registry.encrypt_for_all(b"shared text");
        assert_eq!(out.len(), 2);

        for pair in [alice, bob] {
            let id = pair.peer_id().unwrap();
            let service = CipherService::new(Arc::new(pair)).unwrap();
            let ciphertext = out[&id].as_ref().unwrap();
            assert_eq!(service.decrypt(ciphertext).unwrap(), b"shared text");
        }
    }

    #[test]
    fn test_encrypt_for_all_isolates_failures() {
        let mut registry = PeerRegistry::new();
        let big = registry.add_peer(&der(&test_keys::full_size())).unwrap();
        let small = registry.add_peer(&der(&test_keys::alice())).unwrap();

        // Fits 245 bytes but not the 117 a 1024-bit key can carry
        let text = vec![b'x'; 200];
        let out = registry.encrypt_for_all(&text);

        assert!(out[&big].is_ok());
        assert!(matches!(
            out[&small],
            Err(Error::PayloadTooLarge { len: 200, max: 117 })
        ));
        assert!(registry.get_public_key(&big).is_some());
        assert!(registry.get_public_key(&small).is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_load_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bob.pem");
        let bob = test_keys::bob();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(public_key_to_pem(bob.public_key()).unwrap().as_bytes())
            .unwrap();

        let registry = PeerRegistry::from_key_files(&[&path]).unwrap();
        assert!(registry.list_peer_ids().contains(&bob.peer_id().unwrap()));

        let bad = dir.path().join("bad.pem");
        std::fs::write(&bad, "nope").unwrap();
        let err = PeerRegistry::from_key_files(&[&bad]).unwrap_err();
        assert!(err.to_string().contains("bad.pem"));
    }
}
