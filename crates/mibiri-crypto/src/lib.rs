//! Cryptographic primitives for Mibiri.
//!
//! This crate provides:
//! - X25519 keypairs and base64 public keys
//! - Public-key authenticated encryption ("box") between two keypairs
//! - Local profile files holding a user's keypair
//!
//! # Design
//!
//! A box is sealed with a key derived from the X25519 shared secret of the
//! sender's private key and the recipient's public key, so either side can
//! recompute it. The symmetric cipher is XChaCha20-Poly1305; its 24-byte nonce
//! is large enough to be drawn at random for every message.

#![forbid(unsafe_code)]

pub mod keys;
pub mod profile;
pub mod seal;

pub use keys::{Keypair, PublicKey};
pub use profile::{default_profile_dir, Profile};
pub use seal::{decrypt, encrypt, CryptoError};
