//! Mibiri relay: user directory, mailboxes and the line protocol server.
//!
//! The relay:
//! 1. Keeps the current public key of every registered username
//! 2. Queues ciphertext for registered recipients until they drain it
//! 3. Never sees plaintext or private keys

#![forbid(unsafe_code)]

pub mod dispatch;
pub mod server;
pub mod store;

pub use dispatch::{Dispatcher, RelayError};
pub use server::{handle_connection, ConnectionLimits, Relay, RelayConfig};
pub use store::{Message, Store, StoreError};
