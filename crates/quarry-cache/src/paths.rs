use crate::error::{CacheError, Result};
use crate::version::{Version, VERSION_HEX_LEN};
use globset::{Glob, GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};

/// Derives cache file paths for one source file.
///
/// A source `<dir>/<stem>.<exts>` caches version `v` at `<dir>/<stem>-<v>.<exts>.<suffix>`.
/// The stem ends at the first dot that is not a leading dot, so `decisions.csv` caches to
/// `decisions-<v>.csv.cache` and `a.tar.gz` to `a-<v>.tar.gz.cache`. Names without an
/// extension drop that segment: `Makefile-<v>.cache`.
#[derive(Clone, Debug)]
pub struct CachePaths {
    source: PathBuf,
    dir: PathBuf,
    stem: String,
    extensions: Option<String>,
    suffix: String,
    pattern: Glob,
    matcher: GlobMatcher,
}

impl CachePaths {
    pub fn new(source: impl AsRef<Path>, suffix: &str) -> Result<Self> {
        let source = source.as_ref().to_path_buf();
        let invalid = || CacheError::InvalidSourcePath {
            path: source.clone(),
        };

        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(invalid)?;
        let suffix = suffix.trim_start_matches('.');
        if suffix.is_empty() {
            return Err(CacheError::Config {
                message: "cache suffix must not be empty".to_string(),
            });
        }
        if suffix.contains(['/', '\\']) {
            return Err(CacheError::Config {
                message: format!("cache suffix `{suffix}` must not contain a path separator"),
            });
        }

        let (stem, extensions) = split_file_name(name);
        let (stem, extensions) = (stem.to_string(), extensions.map(str::to_string));
        let dir = match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut glob = glob_escape(&stem);
        glob.push('-');
        for _ in 0..VERSION_HEX_LEN {
            glob.push_str("[0-9a-f]");
        }
        glob.push_str(&glob_escape(&tail(extensions.as_deref(), suffix)));

        let pattern = GlobBuilder::new(&glob)
            .literal_separator(true)
            .backslash_escape(true)
            .build()?;
        let matcher = pattern.compile_matcher();

        Ok(Self {
            stem,
            extensions,
            suffix: suffix.to_string(),
            source,
            dir,
            pattern,
            matcher,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Directory holding both the source and its cache files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The cache path for `version`. Does not touch the filesystem.
    pub fn cache_path(&self, version: &Version) -> PathBuf {
        self.dir.join(format!(
            "{}-{}{}",
            self.stem,
            version,
            tail(self.extensions.as_deref(), &self.suffix)
        ))
    }

    /// A file-name pattern matching [`CachePaths::cache_path`] for every version.
    pub fn cache_pattern(&self) -> &Glob {
        &self.pattern
    }

    /// Recover the version encoded in a cache path, if `path` is one of ours.
    pub fn version_of(&self, path: &Path) -> Option<Version> {
        let name = path.file_name()?.to_str()?;
        if !self.matcher.is_match(name) {
            return None;
        }
        let rest = name.strip_prefix(self.stem.as_str())?.strip_prefix('-')?;
        Version::parse(rest.get(..VERSION_HEX_LEN)?)
    }

    /// List every cache file for this source on disk, across all versions, sorted by path.
    ///
    /// Regular files and symlinks count; directories with matching names are ignored. Symlinks
    /// are listed so maintenance can delete them, but they are never decoded.
    /// This never creates or deletes anything.
    pub fn find_cache_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CacheError::Enumerate {
                    dir: self.dir.clone(),
                    source,
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Enumerate {
                dir: self.dir.clone(),
                source,
            })?;
            if !self.matcher.is_match(entry.file_name()) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() || file_type.is_symlink() => {
                    files.push(entry.path())
                }
                Ok(_) => {}
                Err(err) => {
                    // Entries can race with deletion by sessions that don't hold our lock.
                    if err.kind() != std::io::ErrorKind::NotFound {
                        tracing::debug!(
                            target = "quarry.cache",
                            path = %entry.path().display(),
                            error = %err,
                            "failed to read cache entry file type"
                        );
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn split_file_name(name: &str) -> (&str, Option<&str>) {
    let skip = name.len() - name.trim_start_matches('.').len();
    match name[skip..].find('.') {
        Some(idx) => {
            let idx = skip + idx;
            let extensions = &name[idx + 1..];
            if extensions.is_empty() {
                (name, None)
            } else {
                (&name[..idx], Some(extensions))
            }
        }
        None => (name, None),
    }
}

fn tail(extensions: Option<&str>, suffix: &str) -> String {
    match extensions {
        Some(extensions) => format!(".{extensions}.{suffix}"),
        None => format!(".{suffix}"),
    }
}

fn glob_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
