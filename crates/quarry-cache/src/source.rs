use crate::error::{CacheError, Result};
use crate::lock::SourceLock;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

enum Content {
    Mmap(Mmap),
    Owned(Vec<u8>),
}

impl Content {
    fn bytes(&self) -> &[u8] {
        match self {
            Content::Mmap(mmap) => &mmap[..],
            Content::Owned(bytes) => bytes.as_slice(),
        }
    }
}

/// A source file held open under an exclusive lock, with its full content available.
///
/// Hashing and parsing share one view of the bytes, so the file is only read once per session.
/// The lock is released when the handle is closed or dropped.
pub struct LockedSource {
    // Declared before `lock` so the mapping is torn down before the lock is released.
    content: Content,
    lock: SourceLock,
}

impl std::fmt::Debug for LockedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedSource")
            .field("path", &self.lock.path())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl LockedSource {
    /// Open `path` for reading and take the exclusive lock on it.
    pub fn open(path: &Path, lock_timeout: Option<Duration>) -> Result<Self> {
        let unavailable = |source| CacheError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(unavailable)?;
        let lock = SourceLock::acquire(file, path, lock_timeout)?;

        // Size is read after locking so a writer that finished just before us is observed.
        let len = lock.file().metadata().map_err(unavailable)?.len();
        let content = if len == 0 {
            Content::Owned(Vec::new())
        } else {
            // Safety: the mapping is read-only and lives no longer than the lock. Writers that
            // respect the lock cannot modify the file while it is mapped.
            match unsafe { MmapOptions::new().map(lock.file()) } {
                Ok(mmap) => Content::Mmap(mmap),
                Err(err) => {
                    tracing::debug!(
                        target = "quarry.cache",
                        path = %path.display(),
                        error = %err,
                        "mmap failed; reading source into memory"
                    );
                    let mut bytes = Vec::with_capacity(len as usize);
                    let mut file = lock.file();
                    file.read_to_end(&mut bytes).map_err(unavailable)?;
                    Content::Owned(bytes)
                }
            }
        };

        Ok(Self { content, lock })
    }

    pub fn path(&self) -> &Path {
        self.lock.path()
    }

    pub fn bytes(&self) -> &[u8] {
        self.content.bytes()
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the lock and close the file.
    pub fn close(self) {
        drop(self);
    }
}
