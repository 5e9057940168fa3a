//! Request dispatch.
//!
//! Decodes one request line, validates it and routes it to the store. Every
//! line produces exactly one response; failures become `{ok:false, error}`.

use std::sync::Arc;

use mibiri_common::helpers::constant_time_eq;
use mibiri_common::{error_code, Request, Response, WireMessage};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::store::{Message, Store, StoreError};

/// Request handling errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("recipient {0:?} not found")]
    RecipientNotFound(String),
    #[error("mailbox of {0:?} is full")]
    MailboxFull(String),
    #[error("sender key for {0:?} does not match the directory")]
    SenderKeyMismatch(String),
    #[error("{0}")]
    Protocol(#[from] mibiri_common::Error),
}

impl RelayError {
    /// Error string sent to the client.
    pub fn code(&self) -> String {
        match self {
            RelayError::UnknownCommand => error_code::UNKNOWN_CMD.to_string(),
            RelayError::RecipientNotFound(_) => error_code::RECIPIENT_NOT_FOUND.to_string(),
            RelayError::MailboxFull(_) => error_code::MAILBOX_FULL.to_string(),
            RelayError::SenderKeyMismatch(_) => error_code::SENDER_KEY_MISMATCH.to_string(),
            RelayError::Protocol(e) => e.to_string(),
        }
    }
}

/// Routes requests to the shared store.
pub struct Dispatcher {
    store: Arc<RwLock<Store>>,
    /// Refuse `send` unless `sender_public_key` is the key registered for `from`
    strict_sender: bool,
}

impl Dispatcher {
    pub fn new(store: Arc<RwLock<Store>>, strict_sender: bool) -> Self {
        Self {
            store,
            strict_sender,
        }
    }

    pub fn store(&self) -> &Arc<RwLock<Store>> {
        &self.store
    }

    /// Handle one raw request line.
    pub async fn handle_line(&self, line: &str) -> Response {
        match self.try_handle_line(line).await {
            Ok(response) => response,
            Err(e) => {
                debug!("request failed: {}", e);
                Response::error(e.code())
            }
        }
    }

    async fn try_handle_line(&self, line: &str) -> Result<Response, RelayError> {
        let request = Request::decode(line)?;
        request.validate()?;
        self.dispatch(request).await
    }

    /// Execute a decoded request.
    pub async fn dispatch(&self, request: Request) -> Result<Response, RelayError> {
        debug!("dispatching {}", request.name());

        match request {
            Request::Register {
                username,
                public_key,
            } => {
                let created = self.store.write().await.register(&username, public_key);
                if created {
                    info!("Registered new user {}", username);
                } else {
                    info!("Updated public key for {}", username);
                }
                Ok(Response::ok())
            }

            Request::GetPubkey { username } => {
                let store = self.store.read().await;
                Ok(match store.lookup(&username) {
                    Some(key) => Response::public_key(key.to_string()),
                    None => Response::not_found(),
                })
            }

            Request::Send {
                from,
                to,
                ciphertext,
                sender_public_key,
            } => {
                let mut store = self.store.write().await;

                // Check and append under the same guard
                if self.strict_sender {
                    let matches = store
                        .lookup(&from)
                        .is_some_and(|key| constant_time_eq(key, &sender_public_key));
                    if !matches {
                        return Err(RelayError::SenderKeyMismatch(from));
                    }
                }

                let message = Message {
                    from,
                    sender_public_key,
                    ciphertext,
                };
                let depth = store.enqueue(&to, message).map_err(|e| match e {
                    StoreError::RecipientNotFound => RelayError::RecipientNotFound(to.clone()),
                    StoreError::MailboxFull(_) => RelayError::MailboxFull(to.clone()),
                })?;

                debug!("Queued message for {} ({} pending)", to, depth);
                Ok(Response::ok())
            }

            Request::Inbox { username } => {
                let drained = self.store.write().await.drain(&username);
                if !drained.is_empty() {
                    debug!("Delivered {} messages to {}", drained.len(), username);
                }
                Ok(Response::messages(
                    drained.into_iter().map(WireMessage::from).collect(),
                ))
            }

            Request::Ping => Ok(Response::pong()),

            Request::Unknown => Err(RelayError::UnknownCommand),
        }
    }
}
