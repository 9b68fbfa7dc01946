use crate::error::{CacheError, Result};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive advisory lock on an open source file, safe to share across processes.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct SourceLock {
    file: File,
    path: PathBuf,
    // `fs2` locks are not a reliable way to exclude other threads of the same process on every
    // platform. Keep an in-process mutex guard for that, while the file lock continues to provide
    // cross-process coordination.
    _guard: MutexGuard<'static, ()>,
}

impl SourceLock {
    /// Lock `file` (already opened from `path`) exclusively.
    ///
    /// With `timeout == None` this blocks until the lock is available. Otherwise it gives up with
    /// [`CacheError::LockTimeout`] once `timeout` has elapsed.
    pub fn acquire(file: File, path: &Path, timeout: Option<Duration>) -> Result<Self> {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mutex = process_lock_for_path(&key);
        let started = Instant::now();

        let guard = match timeout {
            None => mutex.lock(),
            Some(timeout) => mutex
                .try_lock_for(timeout)
                .ok_or_else(|| CacheError::LockTimeout {
                    path: path.to_path_buf(),
                    timeout,
                })?,
        };

        match timeout {
            None => file
                .lock_exclusive()
                .map_err(|source| CacheError::LockUnavailable {
                    path: path.to_path_buf(),
                    source,
                })?,
            Some(timeout) => poll_file_lock(&file, path, started + timeout, timeout)?,
        }

        tracing::trace!(
            target = "quarry.cache",
            path = %path.display(),
            waited_ms = started.elapsed().as_millis() as u64,
            "acquired source lock"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SourceLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::debug!(
                target = "quarry.cache",
                path = %self.path.display(),
                error = %err,
                "failed to release source lock"
            );
        }
    }
}

fn poll_file_lock(file: &File, path: &Path, deadline: Instant, timeout: Duration) -> Result<()> {
    let contended = fs2::lock_contended_error().raw_os_error();
    let mut interval = Duration::from_millis(1);
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(err) if err.raw_os_error() == contended => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CacheError::LockTimeout {
                        path: path.to_path_buf(),
                        timeout,
                    });
                }
                std::thread::sleep(interval.min(deadline - now));
                interval = (interval * 2).min(MAX_POLL_INTERVAL);
            }
            Err(source) => {
                return Err(CacheError::LockUnavailable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

fn process_lock_for_path(path: &Path) -> &'static Mutex<()> {
    static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();
    let locks = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = locks.lock();
    if let Some(existing) = map.get(path) {
        return existing;
    }

    let mutex: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
    map.insert(path.to_path_buf(), mutex);
    mutex
}
