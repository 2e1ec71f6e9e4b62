//! SHA-256 content digests.
//!
//! A [`Digest`] is the primary key of every content object: 32 bytes of
//! SHA-256 rendered as 64 lowercase hex characters. The fixed width lets the
//! metadata schema use `CHAR(64)` and keeps vault keys predictable.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;

/// Read buffer for streaming hashes. Large enough that multi-gigabyte files
/// don't thrash on syscalls, small enough to never matter for memory.
const HASH_BUF_SIZE: usize = 8 * 1024 * 1024;

/// A validated SHA-256 digest in lowercase hex form.
///
/// The only ways to obtain one are hashing actual bytes or parsing a
/// 64-character hex string, so a `Digest` in hand is always well-formed.
///
/// # Examples
///
/// ```
/// use bt_vault::Digest;
///
/// let digest = Digest::of_bytes(b"hi\n");
/// assert!(digest.as_str().starts_with("98ea6e4f"));
/// assert_eq!(digest, digest.as_str().parse().unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Digest(String);

// `crate::error::Error` is `exn::Exn<ErrorKind>`, which doesn't implement
// `Display` (required by serde's `try_from` derive for `Error::custom`), so
// this is written by hand instead of via `#[serde(try_from = "String")]`.
impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::try_from(s).map_err(|err| serde::de::Error::custom(format!("{err:?}")))
    }
}

impl Digest {
    /// Length of the hex rendering: 32 bytes of SHA-256, two chars each.
    pub const HEX_LEN: usize = 64;

    /// Parse and validate a hex digest. Uppercase input is normalized.
    pub fn from_hex(hex: impl AsRef<str>) -> Result<Self> {
        let hex = hex.as_ref();
        if hex.len() != Self::HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            exn::bail!(ErrorKind::InvalidDigest(hex.to_string()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Hash a byte slice already in memory. Prefer [`of_file`](Self::of_file)
    /// for anything that lives on disk.
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self::from_hash(Sha256::digest(bytes).into())
    }

    /// Hash the contents of a file, streaming through a fixed-size buffer.
    pub async fn of_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = tokio::fs::File::open(path.as_ref()).await.map_err(ErrorKind::Io)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        loop {
            let read = file.read(&mut buf).await.map_err(ErrorKind::Io)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self::from_hash(hasher.finalize().into()))
    }

    /// Wrap a raw 32-byte hash. Infallible: every 32-byte value has a valid
    /// hex rendering.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hex::encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = crate::error::Error;
    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}
