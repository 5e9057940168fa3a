//! Mibiri client library: relay connection and the command flows the `mibiri`
//! binary is built on.

#![forbid(unsafe_code)]

pub mod client;
pub mod flows;

pub use client::{RelayClient, DEFAULT_REQUEST_TIMEOUT};
pub use flows::{InboxEntry, ListenConfig, OpenError, SendError};
