//! Key material, canonical key encoding and peer identity derivation

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

pub use rsa::RsaPublicKey as PublicKey;

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

/// Peer address on the relay: lowercase hex SHA-256 of the canonical public key bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Length of the hex rendering of a SHA-256 digest
    pub const LEN: usize = 64;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidKeyMaterial(format!(
                "peer id must be {} hex digits, got {:?}",
                Self::LEN,
                s
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// Canonical (DER SubjectPublicKeyInfo) encoding of a public key
pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| Error::InvalidKeyMaterial(e.to_string()))
}

/// Decode a DER SubjectPublicKeyInfo public key
pub fn decode_public_key(bytes: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(bytes).map_err(|e| Error::InvalidKeyMaterial(e.to_string()))
}

/// Derive the peer id from canonical public key bytes.
///
/// Every peer must compute the same id for the same key bytes, so this is
/// the whole address space of the protocol.
pub fn derive_peer_id(public_key_bytes: &[u8]) -> PeerId {
    PeerId(hex::encode(Sha256::digest(public_key_bytes)))
}

/// Peer id of a decoded public key
pub fn peer_id_of(key: &RsaPublicKey) -> Result<PeerId> {
    Ok(derive_peer_id(&encode_public_key(key)?))
}

/// Turn a textual public key into canonical DER bytes.
///
/// Accepts a PEM `PUBLIC KEY` block or the bare base64 body the mobile
/// client shares. Whitespace and stray quotes are ignored.
pub fn parse_public_key_text(text: &str) -> Result<Vec<u8>> {
    let body: String = text
        .replace(PEM_HEADER, "")
        .replace(PEM_FOOTER, "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '"')
        .collect();

    if body.is_empty() {
        return Err(Error::InvalidKeyMaterial("empty public key".to_string()));
    }

    let der = BASE64
        .decode(body.as_bytes())
        .map_err(|e| Error::InvalidKeyMaterial(format!("invalid base64: {}", e)))?;

    // Reject early so callers get a decode error rather than a wrong id
    decode_public_key(&der)?;
    Ok(der)
}

/// PEM rendering of a public key
pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| Error::InvalidKeyMaterial(e.to_string()))
}

/// Bare base64 DER rendering, the form pasted into the mobile client
pub fn public_key_to_base64(key: &RsaPublicKey) -> Result<String> {
    Ok(BASE64.encode(encode_public_key(key)?))
}

/// RSA key pair identifying this device
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("KeyPair");
        match self.peer_id() {
            Ok(id) => s.field("peer_id", &id.as_str()),
            Err(_) => s.field("peer_id", &"<unencodable>"),
        };
        s.finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::InvalidKeyMaterial(format!("key generation failed: {}", e)))?;
        Ok(Self::from_private(private))
    }

    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { private, public }
    }

    /// Load from a PKCS#8 PEM private key
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::InvalidKeyMaterial(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    /// Export the private key as PKCS#8 PEM
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| Error::InvalidKeyMaterial(e.to_string()))
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Peer id announced for this key pair
    pub fn peer_id(&self) -> Result<PeerId> {
        peer_id_of(&self.public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys;

    #[test]
    fn test_peer_id_deterministic() {
        let bytes = encode_public_key(test_keys::alice().public_key()).unwrap();
        assert_eq!(derive_peer_id(&bytes), derive_peer_id(&bytes));
    }

    #[test]
    fn test_peer_id_distinct_keys() {
        let a = test_keys::alice().peer_id().unwrap();
        let b = test_keys::bob().peer_id().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_peer_id_format() {
        let id = derive_peer_id(b"hello");
        // sha256("hello")
        assert_eq!(
            id.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(id.as_str().len(), PeerId::LEN);
    }

    #[test]
    fn test_peer_id_parse_normalizes_case() {
        let id = derive_peer_id(b"hello");
        let parsed: PeerId = id.as_str().to_uppercase().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("abc".parse::<PeerId>().is_err());
        assert!("z".repeat(64).parse::<PeerId>().is_err());
    }

    #[test]
    fn test_pem_and_base64_give_same_bytes() {
        let key = test_keys::alice().public_key().clone();
        let der = encode_public_key(&key).unwrap();

        let from_pem = parse_public_key_text(&public_key_to_pem(&key).unwrap()).unwrap();
        let from_b64 = parse_public_key_text(&public_key_to_base64(&key).unwrap()).unwrap();

        assert_eq!(from_pem, der);
        assert_eq!(from_b64, der);
        assert_eq!(decode_public_key(&der).unwrap(), key);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_public_key_text("not a key"),
            Err(Error::InvalidKeyMaterial(_))
        ));
        assert!(matches!(
            parse_public_key_text(""),
            Err(Error::InvalidKeyMaterial(_))
        ));
        assert!(decode_public_key(&[0x30, 0x03, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_pkcs8_roundtrip() {
        let pair = test_keys::alice();
        let pem = pair.to_pkcs8_pem().unwrap();
        let loaded = KeyPair::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(loaded.peer_id().unwrap(), pair.peer_id().unwrap());
    }
}
