use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Boxed error returned by pluggable parsers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by artifact codecs.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload of {len} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { len: u64, limit: u64 },
}

/// Errors produced while opening, reading, writing or maintaining a source cache.
///
/// Each variant identifies the stage that failed. Nothing here is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("source file {path} is unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source path {path} has no usable file name")]
    InvalidSourcePath { path: PathBuf },

    #[error("failed to lock {path}: {source}")]
    LockUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout:?} waiting for the lock on {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("cache file {path} is corrupt: {source}")]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("failed to read cache file {path}: {source}")]
    CacheRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cache file {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode artifact: {source}")]
    Encode {
        #[source]
        source: CodecError,
    },

    #[error("failed to list cache files in {dir}: {source}")]
    Enumerate {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove cache file {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache file pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("invalid cache configuration: {message}")]
    Config { message: String },
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: err.message().to_string(),
        }
    }
}

impl CacheError {
    /// Returns `true` for errors caused by an existing cache file that could not be decoded.
    ///
    /// Callers that want to recover typically `remove()` the cache and retry.
    pub fn is_cache_corrupt(&self) -> bool {
        matches!(self, CacheError::CacheCorrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_the_failing_path() {
        let err = CacheError::Remove {
            path: PathBuf::from("/data/decisions-abc.csv.cache"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let message = err.to_string();
        assert!(message.contains("decisions-abc.csv.cache"), "{message}");
        assert!(!err.is_cache_corrupt());
    }

    #[test]
    fn toml_errors_become_config_errors() {
        let err = toml::from_str::<toml::Value>("suffix = ").unwrap_err();
        let err = CacheError::from(err);
        assert!(matches!(err, CacheError::Config { .. }), "{err:?}");
    }
}
