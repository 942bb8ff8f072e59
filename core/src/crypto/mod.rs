//! Cryptographic primitives for clipsync
//!
//! - RSA key pairs identify devices; the peer id is the SHA-256 of the
//!   DER-encoded public key
//! - RSA PKCS#1 v1.5 encrypts each clipboard update per recipient

mod cipher;
mod keys;

pub use cipher::{CipherService, PKCS1_V15_OVERHEAD};
pub use keys::{
    decode_public_key, derive_peer_id, encode_public_key, parse_public_key_text, peer_id_of,
    public_key_to_base64, public_key_to_pem, KeyPair, PeerId, PublicKey,
};
