//! User directory and per-user mailboxes.
//!
//! A user record is created by the first `register` and holds the current
//! public key plus a FIFO queue of undelivered messages. Everything lives in
//! memory and is gone when the relay exits.
//!
//! The store itself is not synchronized; the relay wraps it in a single lock
//! and performs each command under one write guard.

use std::collections::{HashMap, VecDeque};

use mibiri_common::WireMessage;

/// Default cap on queued messages per user.
pub const DEFAULT_MAX_MAILBOX_LEN: usize = 1024;

/// A queued message. Never modified after it is enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Claimed sender username (not authenticated by the relay)
    pub from: String,
    /// Key the sender says it encrypted with
    pub sender_public_key: String,
    /// Opaque base64 blob
    pub ciphertext: String,
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        WireMessage {
            from: message.from,
            sender_public_key: message.sender_public_key,
            ciphertext: message.ciphertext,
        }
    }
}

#[derive(Debug)]
struct UserRecord {
    public_key: String,
    mailbox: VecDeque<Message>,
}

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("mailbox full ({0} messages)")]
    MailboxFull(usize),
}

/// Counts for periodic logging
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub users: usize,
    pub queued: usize,
}

/// Directory plus mailboxes.
#[derive(Debug)]
pub struct Store {
    users: HashMap<String, UserRecord>,
    /// 0 disables the cap
    max_mailbox_len: usize,
}

impl Store {
    /// Create an empty store.
    pub fn new(max_mailbox_len: usize) -> Self {
        Self {
            users: HashMap::new(),
            max_mailbox_len,
        }
    }

    /// Upsert the public key for `username`.
    ///
    /// Returns true when the user was not registered before. An existing
    /// user's mailbox is left untouched.
    pub fn register(&mut self, username: &str, public_key: String) -> bool {
        match self.users.get_mut(username) {
            Some(record) => {
                record.public_key = public_key;
                false
            }
            None => {
                self.users.insert(
                    username.to_string(),
                    UserRecord {
                        public_key,
                        mailbox: VecDeque::new(),
                    },
                );
                true
            }
        }
    }

    /// Current public key of `username`.
    pub fn lookup(&self, username: &str) -> Option<&str> {
        self.users
            .get(username)
            .map(|record| record.public_key.as_str())
    }

    /// Append `message` to the recipient's queue.
    ///
    /// Returns the queue depth after the append.
    pub fn enqueue(&mut self, recipient: &str, message: Message) -> Result<usize, StoreError> {
        let record = self
            .users
            .get_mut(recipient)
            .ok_or(StoreError::RecipientNotFound)?;

        if self.max_mailbox_len > 0 && record.mailbox.len() >= self.max_mailbox_len {
            return Err(StoreError::MailboxFull(self.max_mailbox_len));
        }

        record.mailbox.push_back(message);
        Ok(record.mailbox.len())
    }

    /// Take every queued message for `username`, oldest first.
    ///
    /// An unregistered user simply has nothing to drain.
    pub fn drain(&mut self, username: &str) -> Vec<Message> {
        self.users
            .get_mut(username)
            .map(|record| std::mem::take(&mut record.mailbox).into())
            .unwrap_or_default()
    }

    /// Number of messages waiting for `username`.
    pub fn pending(&self, username: &str) -> usize {
        self.users
            .get(username)
            .map(|record| record.mailbox.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            users: self.users.len(),
            queued: self.users.values().map(|r| r.mailbox.len()).sum(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MAILBOX_LEN)
    }
}
