//! Client command flows: register, send, inbox, listen.
//!
//! Each flow is a short sequence of round trips with no retries; any
//! transport failure aborts the flow.

use std::fmt;
use std::time::Duration;

use mibiri_common::helpers::ServerAddr;
use mibiri_common::{Result, WireMessage};
use mibiri_crypto::{decrypt, encrypt, CryptoError, Profile, PublicKey};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::client::{RelayClient, DEFAULT_REQUEST_TIMEOUT};

/// Default pause between polls in `listen`.
pub const DEFAULT_LISTEN_INTERVAL: Duration = Duration::from_secs(2);

/// Failures of the send flow.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("recipient {0:?} not found or has no key")]
    RecipientUnknown(String),

    #[error("relay rejected the message: {0}")]
    Rejected(String),

    #[error("encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transport(#[from] mibiri_common::Error),
}

/// Why a single inbox message could not be read.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("invalid sender key: {0}")]
    SenderKey(mibiri_common::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// One drained message after local decryption.
#[derive(Debug)]
pub struct InboxEntry {
    pub from: String,
    pub sender_public_key: String,
    pub result: std::result::Result<String, OpenError>,
}

impl fmt::Display for InboxEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(text) => write!(f, "{}: {}", self.from, text),
            Err(e) => write!(f, "Failed to decrypt from {}: {}", self.from, e),
        }
    }
}

/// Push the profile's public key to the relay.
pub async fn register(client: &mut RelayClient, profile: &Profile) -> Result<()> {
    client
        .register(&profile.username, &profile.keypair.public_key())
        .await?;
    info!("registered {}", profile.username);
    Ok(())
}

/// Look up `to`, seal `message` locally and submit it.
pub async fn send(
    client: &mut RelayClient,
    profile: &Profile,
    to: &str,
    message: &str,
) -> std::result::Result<(), SendError> {
    let recipient = client
        .get_pubkey(to)
        .await?
        .ok_or_else(|| SendError::RecipientUnknown(to.to_string()))?;

    let ciphertext = encrypt(&profile.keypair, &recipient, message)?;

    let response = client
        .send_ciphertext(
            &profile.username,
            to,
            ciphertext,
            &profile.keypair.public_key(),
        )
        .await?;

    if !response.ok {
        return Err(SendError::Rejected(
            response.error.unwrap_or_else(|| "no reason given".to_string()),
        ));
    }

    debug!("sent message from {} to {}", profile.username, to);
    Ok(())
}

/// Decrypt each drained message on its own; one failure does not stop the rest.
pub fn open_messages(profile: &Profile, messages: Vec<WireMessage>) -> Vec<InboxEntry> {
    messages
        .into_iter()
        .map(|message| {
            let result = PublicKey::from_base64(&message.sender_public_key)
                .map_err(OpenError::SenderKey)
                .and_then(|sender| {
                    decrypt(&profile.keypair, &sender, &message.ciphertext).map_err(OpenError::from)
                });

            InboxEntry {
                from: message.from,
                sender_public_key: message.sender_public_key,
                result,
            }
        })
        .collect()
}

/// Drain the profile's mailbox once.
pub async fn inbox(client: &mut RelayClient, profile: &Profile) -> Result<Vec<InboxEntry>> {
    let messages = client.inbox(&profile.username).await?;
    Ok(open_messages(profile, messages))
}

/// Check that the relay answers.
pub async fn ping(client: &mut RelayClient) -> Result<Duration> {
    let rtt = client.ping().await?;
    debug!("pong after {:?}", rtt);
    Ok(rtt)
}

/// Polling parameters for `listen`.
#[derive(Debug, Clone, Copy)]
pub struct ListenConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_LISTEN_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Poll the mailbox until `shutdown` fires, handing every entry to `on_entry`.
///
/// Each poll uses a fresh connection. Shutdown is observed while waiting
/// between polls, never in the middle of a drain.
pub async fn listen<F>(
    addr: &ServerAddr,
    profile: &Profile,
    config: ListenConfig,
    mut shutdown: oneshot::Receiver<()>,
    mut on_entry: F,
) -> Result<()>
where
    F: FnMut(InboxEntry),
{
    loop {
        let mut client = RelayClient::connect(addr, config.request_timeout).await?;
        let entries = inbox(&mut client, profile).await?;
        drop(client);

        if !entries.is_empty() {
            debug!("received {} messages", entries.len());
        }
        for entry in entries {
            on_entry(entry);
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("listen stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
