use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a [`Version`] in hex characters.
pub const VERSION_HEX_LEN: usize = 64;

/// A content-derived version: the SHA-256 digest of a source file's bytes, as lowercase hex.
///
/// Byte-identical content always yields the same version.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Compute the version of `bytes`.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a version string as it appears in cache file names.
    ///
    /// Returns `None` unless `s` is exactly [`VERSION_HEX_LEN`] lowercase hex digits.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == VERSION_HEX_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
