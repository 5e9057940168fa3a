//! X25519 keypairs and public keys.
//!
//! Public keys travel as standard base64 (32 bytes → 44 characters). The
//! private half never leaves the local machine.
//!
//! # Example
//!
//! ```
//! use mibiri_crypto::keys::{Keypair, PublicKey};
//!
//! let keypair = Keypair::generate();
//! let encoded = keypair.public_key().to_base64();
//!
//! let parsed = PublicKey::from_base64(&encoded).unwrap();
//! assert_eq!(parsed, keypair.public_key());
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mibiri_common::protocol::PUBLIC_KEY_LEN;
use mibiri_common::{Error, Result};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

/// X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Create a public key from raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a public key from its base64 representation.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| Error::crypto(format!("invalid base64 public key: {}", e)))?;

        let bytes: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::crypto(format!(
                "invalid public key length: expected {} bytes, got {}",
                PUBLIC_KEY_LEN,
                b.len()
            ))
        })?;

        Ok(Self(bytes))
    }

    /// Get the base64 representation used on the wire.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Short hex fingerprint (first 8 bytes of SHA-256) for comparing keys by eye.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }

    pub(crate) fn to_dalek(self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

/// X25519 keypair.
///
/// The secret is zeroized on drop.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_secret(secret)
    }

    /// Create from raw private key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    /// Get the public half.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Get the private key bytes.
    ///
    /// # Security
    /// Handle with care! These bytes can recreate the keypair.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(a.public_key(), b.public_key());

        // 32 bytes base64 with padding
        assert_eq!(a.public_key().to_base64().len(), 44);
    }

    #[test]
    fn test_keypair_bytes_roundtrip() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_bytes(*keypair.secret_bytes());
        assert_eq!(restored.public_key(), keypair.public_key());
    }

    #[test]
    fn test_public_key_rejects_wrong_length() {
        let err = PublicKey::from_base64(&STANDARD.encode([1u8; 31])).unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
        assert!(PublicKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keypair = Keypair::generate();
        let debug = format!("{:?}", keypair);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&STANDARD.encode(*keypair.secret_bytes())));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let key = PublicKey::from_bytes([9u8; 32]);
        assert_eq!(key.fingerprint(), key.fingerprint());
        assert_eq!(key.fingerprint().len(), 16);
    }
}
