use quarry_cache::{BoxError, CacheConfig, CacheError, CacheStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn word_count(bytes: &[u8]) -> Result<usize, BoxError> {
    Ok(std::str::from_utf8(bytes)?.split_whitespace().count())
}

fn write_source(tmp: &TempDir) -> PathBuf {
    let path = tmp.path().join("words.txt");
    std::fs::write(&path, "alpha beta gamma delta\n").unwrap();
    path
}

#[test]
fn concurrent_sessions_parse_each_version_once() {
    let tmp = TempDir::new().unwrap();
    let path = write_source(&tmp);
    let parses = Arc::new(AtomicUsize::new(0));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let path = path.clone();
        let parses = parses.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            // Independent stores, as separate processes would have.
            let store = CacheStore::new(&path, move |bytes: &[u8]| {
                parses.fetch_add(1, Ordering::SeqCst);
                // Widen the window in which an unserialized writer would race.
                thread::sleep(Duration::from_millis(20));
                word_count(bytes)
            })
            .unwrap();
            barrier.wait();
            store.get().unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 4);
    }
    assert_eq!(parses.load(Ordering::SeqCst), 1);

    let store = CacheStore::new(&path, word_count).unwrap();
    assert_eq!(store.open().unwrap().cache_files().unwrap().len(), 1);
}

#[test]
fn second_session_waits_for_the_first_to_close() {
    let tmp = TempDir::new().unwrap();
    let path = write_source(&tmp);
    let closed = Arc::new(AtomicBool::new(false));
    let (opened_tx, opened_rx) = mpsc::channel();

    let holder = {
        let path = path.clone();
        let closed = closed.clone();
        thread::spawn(move || {
            let store = CacheStore::new(&path, word_count).unwrap();
            let session = store.open().unwrap();
            opened_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
            session.get().unwrap();
            closed.store(true, Ordering::SeqCst);
            session.close();
        })
    };

    opened_rx.recv().unwrap();
    let store = CacheStore::new(&path, word_count).unwrap();
    let session = store.open().unwrap();
    assert!(closed.load(Ordering::SeqCst));
    // The first session's cache file is visible once we hold the lock.
    assert!(session.is_cached().unwrap());
    assert_eq!(session.get().unwrap(), 4);
    assert_eq!(session.stats().parses, 0);

    holder.join().unwrap();
}

#[test]
fn bounded_wait_times_out_while_lock_is_held() {
    let tmp = TempDir::new().unwrap();
    let path = write_source(&tmp);
    let (opened_tx, opened_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let holder = {
        let path = path.clone();
        thread::spawn(move || {
            let store = CacheStore::new(&path, word_count).unwrap();
            let session = store.open().unwrap();
            opened_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            session.close();
        })
    };

    opened_rx.recv().unwrap();
    let store = CacheStore::with_config(
        &path,
        word_count,
        CacheConfig::default().with_lock_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    let err = store.open().unwrap_err();
    assert!(matches!(err, CacheError::LockTimeout { .. }), "{err:?}");

    done_tx.send(()).unwrap();
    holder.join().unwrap();

    // Once released, the bounded open succeeds.
    assert_eq!(store.get().unwrap(), 4);
}
