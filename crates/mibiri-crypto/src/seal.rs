//! Public-key authenticated encryption between two X25519 keypairs.
//!
//! Blob format (base64 on the wire):
//! `version (1 byte) || nonce (24 bytes) || ciphertext || tag (16 bytes)`
//!
//! - Version `0x01`: X25519 + HKDF-SHA256 + XChaCha20-Poly1305. The version
//!   byte is authenticated as associated data.
//!
//! The symmetric key is derived from the shared secret with a salt of
//! `sender_public || recipient_public`, so a blob only opens for the exact
//! (sender, recipient) pair it was sealed for.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::keys::{Keypair, PublicKey};

/// Box encryption errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext is not valid base64")]
    Encoding,

    #[error("ciphertext too short")]
    TooShort,

    #[error("unsupported ciphertext version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("key agreement produced a non-contributory shared secret")]
    WeakKey,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: data may be corrupted or wrong key")]
    DecryptionFailed,

    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
}

/// Current blob version.
const BLOB_VERSION: u8 = 0x01;
/// XChaCha20-Poly1305 nonce size.
const NONCE_SIZE: usize = 24;
/// Poly1305 tag size.
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = 1 + NONCE_SIZE;

const KDF_INFO: &[u8] = b"mibiri box v1";

fn derive_key(
    own_secret: &StaticSecret,
    peer: &PublicKey,
    sender: &PublicKey,
    recipient: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let shared = own_secret.diffie_hellman(&peer.to_dalek());
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKey);
    }

    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(sender.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(KDF_INFO, &mut key[..])
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(key)
}

/// Seal `plaintext` from `sender` to `recipient`.
///
/// Every call draws a fresh random nonce, so sealing the same text twice
/// yields different blobs.
pub fn encrypt(
    sender: &Keypair,
    recipient: &PublicKey,
    plaintext: &str,
) -> Result<String, CryptoError> {
    let sender_public = sender.public_key();
    let key = derive_key(sender.secret(), recipient, &sender_public, recipient)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext.as_bytes(),
                aad: &[BLOB_VERSION],
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    blob.push(BLOB_VERSION);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(blob))
}

/// Open a blob sealed by `sender` for `recipient`.
///
/// Fails on tampering, a wrong key on either side, or a malformed blob; never
/// returns partial plaintext.
pub fn decrypt(
    recipient: &Keypair,
    sender: &PublicKey,
    blob: &str,
) -> Result<String, CryptoError> {
    let data = STANDARD
        .decode(blob.trim())
        .map_err(|_| CryptoError::Encoding)?;

    let (&version, rest) = data.split_first().ok_or(CryptoError::TooShort)?;
    if version != BLOB_VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    if rest.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::TooShort);
    }

    let recipient_public = recipient.public_key();
    let key = derive_key(recipient.secret(), sender, sender, &recipient_public)?;

    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &[BLOB_VERSION],
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}
