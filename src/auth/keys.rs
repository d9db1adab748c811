//! Public keys in OpenSSH `authorized_keys` format.
//!
//! Keys are compared byte-for-byte on their canonical wire encoding (the
//! decoded base64 blob), independent of the transport library that produced
//! them.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use sha2::{Digest, Sha256};

/// Errors raised while loading authorized keys.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Failed to read authorized keys file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed key in {path} at line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid public key: {0}")]
    InvalidKey(String),
}

/// A public key in canonical wire encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wrap an already-encoded key blob, validating its framing.
    pub fn from_wire(blob: Vec<u8>) -> Result<Self, KeyError> {
        if read_ssh_string(&blob).is_none() {
            return Err(KeyError::InvalidKey(
                "key blob does not start with a key type".to_string(),
            ));
        }
        Ok(Self(blob))
    }

    /// Parse a single `authorized_keys` entry.
    ///
    /// Leading options (`no-pty`, `command="..."`, ...) and the trailing
    /// comment are ignored. The entry is recognised by a `<type> <blob>` pair
    /// whose blob embeds the same type name.
    pub fn parse_authorized_line(line: &str) -> Result<Self, KeyError> {
        let fields: Vec<&str> = line.split_whitespace().collect();

        for pair in fields.windows(2) {
            let (key_type, encoded) = (pair[0], pair[1]);
            let Ok(blob) = STANDARD.decode(encoded) else {
                continue;
            };
            if read_ssh_string(&blob) == Some(key_type.as_bytes()) {
                return Ok(Self(blob));
            }
        }

        Err(KeyError::InvalidKey(
            "no '<type> <base64>' key pair found".to_string(),
        ))
    }

    /// The key algorithm named inside the blob, e.g. `ssh-ed25519`.
    pub fn algorithm(&self) -> &str {
        read_ssh_string(&self.0)
            .and_then(|name| std::str::from_utf8(name).ok())
            .unwrap_or("unknown")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// OpenSSH-style `SHA256:` fingerprint, suitable for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("algorithm", &self.algorithm())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm(), STANDARD.encode(&self.0))
    }
}

/// Reads the first length-prefixed string of an SSH wire blob.
fn read_ssh_string(blob: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len == 0 {
        return None;
    }
    blob.get(4..4 + len)
}

/// Parse the contents of an `authorized_keys` file.
///
/// `path` is only used for error reporting.
pub fn parse_authorized_keys(path: &Path, contents: &str) -> Result<Vec<PublicKey>, KeyError> {
    let mut keys = Vec::new();

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let key = PublicKey::parse_authorized_line(line).map_err(|e| KeyError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        keys.push(key);
    }

    Ok(keys)
}

/// Read and parse an `authorized_keys` file from disk.
pub fn load_authorized_keys(path: &Path) -> Result<Vec<PublicKey>, KeyError> {
    let contents = std::fs::read_to_string(path).map_err(|source| KeyError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_authorized_keys(path, &contents)
}
