use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CACHE_SUFFIX: &str = "cache";

/// What to do when a freshly parsed artifact cannot be written to the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Log the failure and still return the artifact.
    #[default]
    BestEffort,
    /// Fail the `get()` call.
    Strict,
}

/// Behaviour of a [`CacheStore`](crate::CacheStore), fixed at construction time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Final extension of cache file names, without the leading dot.
    pub suffix: String,
    /// How long to wait for the source lock. `None` waits forever.
    #[serde(rename = "lock_timeout_ms", with = "duration_ms")]
    pub lock_timeout: Option<Duration>,
    pub write_policy: WritePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_CACHE_SUFFIX.to_string(),
            lock_timeout: None,
            write_policy: WritePolicy::BestEffort,
        }
    }
}

impl CacheConfig {
    /// Defaults, overridden by `QUARRY_CACHE_SUFFIX`, `QUARRY_CACHE_LOCK_TIMEOUT_MS` and
    /// `QUARRY_CACHE_WRITE_POLICY` (`best_effort` or `strict`).
    ///
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse a TOML document such as:
    ///
    /// ```toml
    /// suffix = "cache"
    /// lock_timeout_ms = 30000
    /// write_policy = "strict"
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(suffix) = lookup("QUARRY_CACHE_SUFFIX") {
            let suffix = suffix.trim().trim_start_matches('.');
            if suffix.is_empty() {
                ignore_env("QUARRY_CACHE_SUFFIX", "empty suffix");
            } else {
                config.suffix = suffix.to_string();
            }
        }

        if let Some(value) = lookup("QUARRY_CACHE_LOCK_TIMEOUT_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => config.lock_timeout = Some(Duration::from_millis(ms)),
                Err(_) => ignore_env("QUARRY_CACHE_LOCK_TIMEOUT_MS", "expected milliseconds"),
            }
        }

        if let Some(value) = lookup("QUARRY_CACHE_WRITE_POLICY") {
            match value.trim() {
                "best_effort" => config.write_policy = WritePolicy::BestEffort,
                "strict" => config.write_policy = WritePolicy::Strict,
                _ => ignore_env(
                    "QUARRY_CACHE_WRITE_POLICY",
                    "expected `best_effort` or `strict`",
                ),
            }
        }

        config
    }
}

fn ignore_env(key: &'static str, reason: &'static str) {
    tracing::warn!(
        target = "quarry.cache",
        key,
        reason,
        "ignoring malformed cache environment variable"
    );
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_block_forever_and_write_best_effort() {
        let config = CacheConfig::default();
        assert_eq!(config.suffix, "cache");
        assert_eq!(config.lock_timeout, None);
        assert_eq!(config.write_policy, WritePolicy::BestEffort);
    }

    #[test]
    fn parses_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            suffix = "bin"
            lock_timeout_ms = 250
            write_policy = "strict"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            CacheConfig::default()
                .with_suffix("bin")
                .with_lock_timeout(Duration::from_millis(250))
                .with_write_policy(WritePolicy::Strict)
        );

        assert_eq!(CacheConfig::from_toml_str("").unwrap(), CacheConfig::default());
        assert!(CacheConfig::from_toml_str("unknown = 1").is_err());
    }

    #[test]
    fn env_overrides_and_ignores_malformed_values() {
        let env: HashMap<&str, &str> = [
            ("QUARRY_CACHE_SUFFIX", ".memo"),
            ("QUARRY_CACHE_LOCK_TIMEOUT_MS", "soon"),
            ("QUARRY_CACHE_WRITE_POLICY", "strict"),
        ]
        .into_iter()
        .collect();
        let config = CacheConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.suffix, "memo");
        assert_eq!(config.lock_timeout, None);
        assert_eq!(config.write_policy, WritePolicy::Strict);
    }
}
