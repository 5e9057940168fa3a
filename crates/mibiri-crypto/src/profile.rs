//! Local profile files.
//!
//! A profile is `<dir>/<username>.json` holding the user's keypair as base64.
//! Keys are stored unencrypted; the file is created with mode 0600 on Unix.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mibiri_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::keys::{Keypair, PublicKey};

/// Environment variable overriding the profile directory.
pub const PROFILE_DIR_ENV: &str = "MIBIRI_HOME";

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct ProfileFile {
    username: String,
    private_key: String,
    public_key: String,
}

/// A user's local identity.
#[derive(Debug)]
pub struct Profile {
    pub username: String,
    pub keypair: Keypair,
}

impl Profile {
    /// Create a profile with a freshly generated keypair.
    pub fn generate(username: &str) -> Result<Self> {
        validate_username(username)?;
        Ok(Self {
            username: username.to_string(),
            keypair: Keypair::generate(),
        })
    }

    /// Path of the profile file for `username` inside `dir`.
    pub fn path(dir: &Path, username: &str) -> Result<PathBuf> {
        validate_username(username)?;
        Ok(dir.join(format!("{}.json", username)))
    }

    /// Write the profile, creating `dir` if needed. Returns the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = Self::path(dir, &self.username)?;
        fs::create_dir_all(dir)?;

        let secret = self.keypair.secret_bytes();
        let file = ProfileFile {
            username: self.username.clone(),
            private_key: STANDARD.encode(&secret[..]),
            public_key: self.keypair.public_key().to_base64(),
        };
        let json = Zeroizing::new(serde_json::to_string_pretty(&file).map_err(Error::serialization)?);

        fs::write(&path, json.as_bytes())?;

        // Restrict permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&path, perms)?;
        }

        Ok(path)
    }

    /// Load the profile for `username` from `dir`.
    pub fn load(dir: &Path, username: &str) -> Result<Self> {
        let path = Self::path(dir, username)?;
        let json = match fs::read_to_string(&path) {
            Ok(json) => Zeroizing::new(json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!(
                    "no profile for {:?} at {} (run keygen first)",
                    username,
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let file: ProfileFile = serde_json::from_str(&json)
            .map_err(|e| Error::config(format!("malformed profile {}: {}", path.display(), e)))?;

        if file.username != username {
            return Err(Error::config(format!(
                "profile {} belongs to {:?}",
                path.display(),
                file.username
            )));
        }

        let secret = Zeroizing::new(
            STANDARD
                .decode(file.private_key.trim())
                .map_err(|e| Error::config(format!("invalid private key encoding: {}", e)))?,
        );
        if secret.len() != 32 {
            return Err(Error::config("invalid private key length: expected 32 bytes"));
        }

        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&secret);
        let keypair = Keypair::from_secret_bytes(*key_bytes);

        let stored_public = PublicKey::from_base64(&file.public_key)?;
        if stored_public != keypair.public_key() {
            return Err(Error::config(format!(
                "profile {} public key does not match its private key",
                path.display()
            )));
        }

        Ok(Self {
            username: username.to_string(),
            keypair,
        })
    }
}

/// Resolve the default profile directory: `$MIBIRI_HOME`, else `~/.mibiri`.
pub fn default_profile_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(PROFILE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".mibiri"))
        .ok_or_else(|| Error::config("cannot determine home directory; set MIBIRI_HOME"))
}

fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::config("username must not be empty"));
    }
    if username.contains(['/', '\\']) || username == "." || username == ".." {
        return Err(Error::config(format!(
            "username {:?} is not usable as a file name",
            username
        )));
    }
    Ok(())
}
