use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` through a temporary sibling file and a rename.
///
/// Readers never observe a partially written file under `path`. The temporary file is removed
/// if anything fails.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent"));
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let write_result = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = write_result {
        remove_tmp_best_effort(&tmp_path, "write");
        return Err(err);
    }

    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let rename_result = (|| -> io::Result<()> {
        let mut attempts = 0usize;
        loop {
            match fs::rename(&tmp_path, path) {
                Ok(()) => return Ok(()),
                Err(err) if cfg!(windows) && err.kind() == io::ErrorKind::AlreadyExists => {
                    // On Windows, `rename` doesn't overwrite.
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                        Err(remove_err) => return Err(remove_err),
                    }

                    attempts += 1;
                    if attempts >= MAX_RENAME_ATTEMPTS {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    })();

    match rename_result {
        Ok(()) => {
            sync_dir_best_effort(parent);
            Ok(())
        }
        Err(err) => {
            remove_tmp_best_effort(&tmp_path, "rename");
            Err(err)
        }
    }
}

/// Remove `path`, treating an already-missing file as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn remove_tmp_best_effort(tmp_path: &Path, stage: &'static str) {
    if let Err(err) = remove_file_if_exists(tmp_path) {
        tracing::debug!(
            target = "quarry.cache",
            path = %tmp_path.display(),
            stage,
            error = %err,
            "failed to remove temporary file"
        );
    }
}

fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    {
        static SYNC_DIR_ERROR_LOGGED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target = "quarry.cache",
                        dir = %dir.display(),
                        error = %err,
                        "failed to sync directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = dir;
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.bin");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_rename_cleans_up_temp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blocked.bin");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        assert!(atomic_write(&path, b"data").is_err());
        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("blocked.bin")]);
    }

    #[test]
    fn removing_missing_file_is_ok() {
        let tmp = TempDir::new().unwrap();
        remove_file_if_exists(&tmp.path().join("missing")).unwrap();
    }
}
