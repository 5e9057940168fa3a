//! Line-oriented JSON wire protocol shared by the relay and the client.
//!
//! Every request and every response is a single JSON object followed by `\n`.
//! A connection carries any number of sequential request/response exchanges.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of an X25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Stable error codes carried in `Response::error`.
pub mod error_code {
    pub const UNKNOWN_CMD: &str = "unknown_cmd";
    pub const RECIPIENT_NOT_FOUND: &str = "recipient_not_found";
    pub const MAILBOX_FULL: &str = "mailbox_full";
    pub const SENDER_KEY_MISMATCH: &str = "sender_key_mismatch";
    pub const LINE_TOO_LONG: &str = "line_too_long";
}

/// A client request, tagged by its `cmd` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    /// Upsert the public key for a username.
    Register { username: String, public_key: String },

    /// Look up the registered public key of a username.
    GetPubkey { username: String },

    /// Queue a ciphertext for `to`.
    Send {
        from: String,
        to: String,
        ciphertext: String,
        sender_public_key: String,
    },

    /// Drain the mailbox of a username.
    Inbox { username: String },

    /// Liveness check.
    Ping,

    /// Any `cmd` this relay does not know.
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Decode one request line.
    ///
    /// An object without a string `cmd` is `Unknown`, like an unrecognised
    /// command name. Malformed JSON and missing command fields are errors.
    pub fn decode(line: &str) -> Result<Self> {
        let value: serde_json::Value = decode_line(line)?;
        if !value.is_object() {
            return Err(Error::protocol("request must be a JSON object"));
        }
        if !matches!(value.get("cmd"), Some(serde_json::Value::String(_))) {
            return Ok(Request::Unknown);
        }
        serde_json::from_value(value).map_err(Error::protocol)
    }

    /// Short command name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Register { .. } => "register",
            Request::GetPubkey { .. } => "get_pubkey",
            Request::Send { .. } => "send",
            Request::Inbox { .. } => "inbox",
            Request::Ping => "ping",
            Request::Unknown => "unknown",
        }
    }

    /// Check field contents that the JSON shape alone cannot express.
    pub fn validate(&self) -> Result<()> {
        match self {
            Request::Register {
                username,
                public_key,
            } => {
                require_username("username", username)?;
                require_public_key("public_key", public_key)
            }
            Request::GetPubkey { username } | Request::Inbox { username } => {
                require_username("username", username)
            }
            Request::Send {
                from,
                to,
                ciphertext,
                sender_public_key,
            } => {
                require_username("from", from)?;
                require_username("to", to)?;
                if ciphertext.is_empty() {
                    return Err(Error::protocol("ciphertext must not be empty"));
                }
                require_public_key("sender_public_key", sender_public_key)
            }
            Request::Ping | Request::Unknown => Ok(()),
        }
    }
}

fn require_username(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::protocol(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_public_key(field: &str, value: &str) -> Result<()> {
    if is_valid_public_key(value) {
        Ok(())
    } else {
        Err(Error::protocol(format!(
            "{} must be base64 of {} bytes",
            field, PUBLIC_KEY_LEN
        )))
    }
}

/// Whether `value` is standard base64 encoding exactly one public key.
pub fn is_valid_public_key(value: &str) -> bool {
    matches!(STANDARD.decode(value), Ok(bytes) if bytes.len() == PUBLIC_KEY_LEN)
}

/// A queued message as it travels in an `inbox` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub from: String,
    pub sender_public_key: String,
    pub ciphertext: String,
}

/// A relay response. Fields that do not apply are omitted from the JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<WireMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pong: Option<bool>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn public_key(key: String) -> Self {
        Self {
            ok: true,
            public_key: Some(key),
            ..Self::default()
        }
    }

    /// Failure without an error code, used for a missing `get_pubkey` entry.
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn messages(messages: Vec<WireMessage>) -> Self {
        Self {
            ok: true,
            messages: Some(messages),
            ..Self::default()
        }
    }

    pub fn pong() -> Self {
        Self {
            ok: true,
            pong: Some(true),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Serialize `value` as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value).map_err(Error::serialization)?;
    line.push('\n');
    Ok(line)
}

/// Parse one JSON line, ignoring the trailing line terminator.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim_end_matches(['\r', '\n'])).map_err(Error::protocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> String {
        STANDARD.encode([7u8; PUBLIC_KEY_LEN])
    }

    #[test]
    fn test_decode_register() {
        let line = format!(
            "{{\"cmd\":\"register\",\"username\":\"alice\",\"public_key\":\"{}\"}}\n",
            key()
        );
        let req = Request::decode(&line).unwrap();
        assert_eq!(
            req,
            Request::Register {
                username: "alice".into(),
                public_key: key(),
            }
        );
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_decode_ping_ignores_extra_fields() {
        let req = Request::decode(r#"{"cmd":"ping","nonce":1}"#).unwrap();
        assert_eq!(req, Request::Ping);
    }

    #[test]
    fn test_unknown_cmd_decodes_to_unknown() {
        let req = Request::decode(r#"{"cmd":"call","to":"bob"}"#).unwrap();
        assert_eq!(req, Request::Unknown);
    }

    #[test]
    fn test_missing_or_non_string_cmd_is_unknown() {
        for line in [
            r#"{"username":"bob"}"#,
            r#"{"cmd":5}"#,
            r#"{"cmd":null}"#,
            r#"{"cmd":["ping"]}"#,
        ] {
            assert_eq!(Request::decode(line).unwrap(), Request::Unknown, "{}", line);
        }
    }

    #[test]
    fn test_non_object_is_protocol_error() {
        for line in ["5", "\"ping\"", "[]", "null"] {
            let err = Request::decode(line).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "{}", line);
        }
    }

    #[test]
    fn test_missing_field_is_protocol_error() {
        let err = Request::decode(r#"{"cmd":"send","from":"alice","to":"bob"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("ciphertext"));
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        let err = Request::decode("{not json").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_validate_rejects_bad_key() {
        let req = Request::Register {
            username: "alice".into(),
            public_key: "c2hvcnQ=".into(),
        };
        assert!(req.validate().is_err());

        let req = Request::Register {
            username: "alice".into(),
            public_key: "***".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_username() {
        let req = Request::Inbox {
            username: "  ".into(),
        };
        assert!(req.validate().is_err());

        let req = Request::Send {
            from: "alice".into(),
            to: String::new(),
            ciphertext: "AQ==".into(),
            sender_public_key: key(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_not_found_omits_public_key() {
        let line = encode_line(&Response::not_found()).unwrap();
        assert_eq!(line, "{\"ok\":false}\n");
    }

    #[test]
    fn test_pong_and_error_shapes() {
        assert_eq!(
            encode_line(&Response::pong()).unwrap(),
            "{\"ok\":true,\"pong\":true}\n"
        );
        assert_eq!(
            encode_line(&Response::error(error_code::UNKNOWN_CMD)).unwrap(),
            "{\"ok\":false,\"error\":\"unknown_cmd\"}\n"
        );
    }

    #[test]
    fn test_response_accepts_null_public_key() {
        let resp: Response = decode_line(r#"{"ok": false, "public_key": null}"#).unwrap();
        assert!(!resp.ok);
        assert!(resp.public_key.is_none());
    }

    #[test]
    fn test_request_line_is_newline_terminated_json() {
        let line = encode_line(&Request::Inbox {
            username: "bob".into(),
        })
        .unwrap();
        assert_eq!(line, "{\"cmd\":\"inbox\",\"username\":\"bob\"}\n");
    }
}
