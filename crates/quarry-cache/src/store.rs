use crate::codec::{ArtifactCodec, BincodeCodec};
use crate::config::{CacheConfig, WritePolicy};
use crate::error::{CacheError, CodecError, Result};
use crate::parser::Parser;
use crate::paths::CachePaths;
use crate::source::LockedSource;
use crate::util::{atomic_write, remove_file_if_exists};
use crate::version::Version;
use std::cell::{Cell, OnceCell};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A content-addressed cache of parse results for a single source file.
///
/// Artifacts are stored next to the source as `<stem>-<sha256>.<exts>.<suffix>` and are only
/// ever reused for byte-identical content. All work happens inside a [`CacheSession`], which
/// holds an exclusive lock on the source so concurrent processes never parse or write the same
/// version twice.
///
/// ```no_run
/// use quarry_cache::CacheStore;
///
/// let store = CacheStore::new("decisions.csv", |bytes: &[u8]| {
///     std::str::from_utf8(bytes).map(|text| text.lines().count())
/// })?;
/// let session = store.open()?;
/// let rows = session.get()?;
/// session.prune()?;
/// # Ok::<(), quarry_cache::CacheError>(())
/// ```
pub struct CacheStore<A, P, C = BincodeCodec> {
    paths: CachePaths,
    parser: P,
    codec: C,
    config: CacheConfig,
    _artifact: PhantomData<fn() -> A>,
}

impl<A, P, C> fmt::Debug for CacheStore<A, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("source", &self.paths.source())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<A, P> CacheStore<A, P, BincodeCodec>
where
    P: Parser<A>,
{
    pub fn new(source: impl AsRef<Path>, parser: P) -> Result<Self> {
        Self::with_config(source, parser, CacheConfig::default())
    }

    pub fn with_config(source: impl AsRef<Path>, parser: P, config: CacheConfig) -> Result<Self> {
        Ok(Self {
            paths: CachePaths::new(source, &config.suffix)?,
            parser,
            codec: BincodeCodec::default(),
            config,
            _artifact: PhantomData,
        })
    }
}

impl<A, P, C> CacheStore<A, P, C> {
    /// Replace the on-disk encoding of artifacts.
    pub fn with_codec<C2>(self, codec: C2) -> CacheStore<A, P, C2> {
        CacheStore {
            paths: self.paths,
            parser: self.parser,
            codec,
            config: self.config,
            _artifact: PhantomData,
        }
    }

    pub fn source(&self) -> &Path {
        self.paths.source()
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl<A, P, C> CacheStore<A, P, C>
where
    P: Parser<A>,
    C: ArtifactCodec<A>,
{
    /// Lock the source file and start a session.
    ///
    /// Blocks while another session on the same source is open, or fails with
    /// [`CacheError::LockTimeout`] if a lock timeout is configured.
    pub fn open(&self) -> Result<CacheSession<'_, A, P, C>> {
        let source = LockedSource::open(self.paths.source(), self.config.lock_timeout)?;
        tracing::debug!(
            target = "quarry.cache",
            source = %self.paths.source().display(),
            len = source.len(),
            "opened cache session"
        );
        Ok(CacheSession {
            store: self,
            source,
            version: OnceCell::new(),
            cache_path: OnceCell::new(),
            stats: Cell::new(SessionStats::default()),
        })
    }

    /// Open a session, fetch the artifact and close the session again.
    pub fn get(&self) -> Result<A> {
        let session = self.open()?;
        let artifact = session.get()?;
        session.close();
        Ok(artifact)
    }
}

/// Counters for the work a session performed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Times the parser ran.
    pub parses: usize,
    /// Artifacts served by decoding an existing cache file.
    pub cache_hits: usize,
    /// Cache files written.
    pub cache_writes: usize,
    /// Cache writes that failed and were skipped under [`WritePolicy::BestEffort`].
    pub failed_writes: usize,
}

/// An open, locked view of a source file. The lock is released on [`CacheSession::close`] or
/// drop.
pub struct CacheSession<'a, A, P, C> {
    store: &'a CacheStore<A, P, C>,
    source: LockedSource,
    version: OnceCell<Version>,
    cache_path: OnceCell<PathBuf>,
    stats: Cell<SessionStats>,
}

impl<A, P, C> fmt::Debug for CacheSession<'_, A, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSession")
            .field("source", &self.source)
            .field("version", &self.version.get())
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}

impl<A, P, C> CacheSession<'_, A, P, C>
where
    P: Parser<A>,
    C: ArtifactCodec<A>,
{
    /// The version of the source content, computed on first use.
    pub fn version(&self) -> &Version {
        self.version
            .get_or_init(|| Version::of(self.source.bytes()))
    }

    /// Where the artifact for the current version lives.
    pub fn cache_path(&self) -> &Path {
        self.cache_path
            .get_or_init(|| self.store.paths.cache_path(self.version()))
    }

    /// Raw bytes of the locked source.
    pub fn source_bytes(&self) -> &[u8] {
        self.source.bytes()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.get()
    }

    /// Return the artifact for the current content.
    ///
    /// Decodes the current version's cache file when it exists. Otherwise parses the source and
    /// writes the result, which creates at most one file. A cache file that fails to decode is
    /// reported as [`CacheError::CacheCorrupt`]; it is never silently re-parsed.
    pub fn get(&self) -> Result<A> {
        if self.is_cached()? {
            return self.load();
        }

        tracing::debug!(
            target = "quarry.cache",
            path = %self.cache_path().display(),
            "cache miss"
        );
        let artifact = self.parse()?;
        self.store_artifact(&artifact)?;
        Ok(artifact)
    }

    /// Parse the source directly, bypassing the cache entirely.
    pub fn get_uncached(&self) -> Result<A> {
        self.parse()
    }

    /// [`get`](Self::get), or [`get_uncached`](Self::get_uncached) when `disable_cache` is set.
    pub fn get_with(&self, disable_cache: bool) -> Result<A> {
        if disable_cache {
            self.get_uncached()
        } else {
            self.get()
        }
    }

    /// Whether the current version's cache file is on disk.
    pub fn is_cached(&self) -> Result<bool> {
        let current = self.cache_path();
        Ok(self
            .store
            .paths
            .find_cache_files()?
            .iter()
            .any(|path| path == current))
    }

    /// All cache files for this source, across every version.
    pub fn cache_files(&self) -> Result<Vec<PathBuf>> {
        self.store.paths.find_cache_files()
    }

    /// Versions that currently have a cache file, in path order.
    pub fn cached_versions(&self) -> Result<Vec<Version>> {
        Ok(self
            .cache_files()?
            .iter()
            .filter_map(|path| self.store.paths.version_of(path))
            .collect())
    }

    /// Delete every cache file except the current version's. Returns the deleted paths.
    pub fn prune(&self) -> Result<Vec<PathBuf>> {
        let current = self.cache_path();
        let stale: Vec<_> = self
            .cache_files()?
            .into_iter()
            .filter(|path| path != current)
            .collect();
        self.delete(stale, "pruned stale cache file")
    }

    /// Delete every cache file for this source. Returns the deleted paths.
    pub fn remove(&self) -> Result<Vec<PathBuf>> {
        let all = self.cache_files()?;
        self.delete(all, "removed cache file")
    }

    /// Release the lock and close the source.
    pub fn close(self) {
        tracing::debug!(
            target = "quarry.cache",
            source = %self.source.path().display(),
            stats = ?self.stats.get(),
            "closed cache session"
        );
    }

    fn load(&self) -> Result<A> {
        let path = self.cache_path();
        let read_error = |source| CacheError::CacheRead {
            path: path.to_path_buf(),
            source,
        };
        let too_large = |len| CacheError::CacheCorrupt {
            path: path.to_path_buf(),
            source: CodecError::PayloadTooLarge {
                len,
                limit: self.store.codec.payload_limit().unwrap_or(u64::MAX),
            },
        };
        let over_limit = |len: u64| {
            self.store
                .codec
                .payload_limit()
                .is_some_and(|limit| len > limit)
        };

        // Never decode through a symlink out of the cache directory.
        let meta = std::fs::symlink_metadata(path).map_err(read_error)?;
        if !meta.is_file() {
            return Err(read_error(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "cache entry is not a regular file",
            )));
        }
        if over_limit(meta.len()) {
            return Err(too_large(meta.len()));
        }

        let bytes = std::fs::read(path).map_err(read_error)?;
        if over_limit(bytes.len() as u64) {
            return Err(too_large(bytes.len() as u64));
        }
        let artifact = self
            .store
            .codec
            .decode(&bytes)
            .map_err(|source| CacheError::CacheCorrupt {
                path: path.to_path_buf(),
                source,
            })?;
        self.bump(|stats| stats.cache_hits += 1);
        tracing::debug!(
            target = "quarry.cache",
            path = %path.display(),
            bytes = bytes.len(),
            "cache hit"
        );
        Ok(artifact)
    }

    fn parse(&self) -> Result<A> {
        let artifact = self
            .store
            .parser
            .parse(self.source.bytes())
            .map_err(|source| CacheError::Parse {
                path: self.source.path().to_path_buf(),
                source,
            })?;
        self.bump(|stats| stats.parses += 1);
        Ok(artifact)
    }

    fn store_artifact(&self, artifact: &A) -> Result<()> {
        let path = self.cache_path();
        let written = self
            .store
            .codec
            .encode(artifact)
            .map_err(|source| CacheError::Encode { source })
            .and_then(|bytes| {
                atomic_write(path, &bytes).map_err(|source| CacheError::CacheWrite {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(bytes.len())
            });

        match written {
            Ok(len) => {
                self.bump(|stats| stats.cache_writes += 1);
                tracing::debug!(
                    target = "quarry.cache",
                    path = %path.display(),
                    bytes = len,
                    "wrote cache file"
                );
                Ok(())
            }
            Err(err) => match self.store.config.write_policy {
                WritePolicy::Strict => Err(err),
                WritePolicy::BestEffort => {
                    self.bump(|stats| stats.failed_writes += 1);
                    tracing::warn!(
                        target = "quarry.cache",
                        path = %path.display(),
                        error = %err,
                        "failed to write cache file; returning uncached artifact"
                    );
                    Ok(())
                }
            },
        }
    }

    fn delete(&self, paths: Vec<PathBuf>, message: &'static str) -> Result<Vec<PathBuf>> {
        for path in &paths {
            remove_file_if_exists(path).map_err(|source| CacheError::Remove {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(target = "quarry.cache", path = %path.display(), "{message}");
        }
        Ok(paths)
    }

    fn bump(&self, update: impl FnOnce(&mut SessionStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}
