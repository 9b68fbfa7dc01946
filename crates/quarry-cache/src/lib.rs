//! Locked, content-addressed caching of expensive parse results.
//!
//! A [`CacheStore`] wraps a deterministic parser (`bytes -> artifact`) for one source file and
//! memoizes its result on disk, keyed by the SHA-256 of the source content. Sessions hold an
//! exclusive advisory lock on the source, so independent processes opening the same file are
//! serialized and never parse or write the same version concurrently.
//!
//! ## On-disk layout
//!
//! Cache files live next to their source:
//! - `<stem>-<sha256>.<exts>.<suffix>`, e.g. `decisions-9f86d0….csv.cache`
//! - one file per cached content version; stale versions remain until
//!   [`CacheSession::prune`] or [`CacheSession::remove`]
//! - payloads are encoded by an [`ArtifactCodec`] ([`BincodeCodec`] by default)
//!
//! Writes go through a temporary sibling file and a rename, so a cache file is either complete
//! or absent.

mod codec;
mod config;
mod error;
mod lock;
mod parser;
mod paths;
mod source;
mod store;
mod util;
mod version;

pub use codec::{ArtifactCodec, BincodeCodec, JsonCodec, DEFAULT_PAYLOAD_LIMIT_BYTES};
pub use config::{CacheConfig, WritePolicy, DEFAULT_CACHE_SUFFIX};
pub use error::{BoxError, CacheError, CodecError, Result};
pub use lock::SourceLock;
pub use parser::Parser;
pub use paths::CachePaths;
pub use source::LockedSource;
pub use store::{CacheSession, CacheStore, SessionStats};
pub use version::{Version, VERSION_HEX_LEN};
