//! File access helpers shared by every store.
//!
//! All stores mutate their files by whole-file replacement, so concurrent
//! writers to the same path would lose updates. [`FileLocks`] hands out one
//! mutex per path; every read-modify-write runs under it.

use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Registry of per-path write locks.
///
/// Lock order when two are held: ledger file first, then the daily file.
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry. Stores opened separately on the same data
    /// directory serialize their writes through it. Paths are keyed as given,
    /// so open every store with the same spelling of the directory.
    pub fn shared() -> Arc<FileLocks> {
        static SHARED: OnceLock<Arc<FileLocks>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(FileLocks::new())))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut map = lock_ignoring_poison(&self.locks);
        map.entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock for `path`.
    pub fn with<T>(&self, path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock_for(path);
        let _guard = lock_ignoring_poison(&lock);
        f()
    }
}

// A panic mid-write leaves the file either old or new (atomic rename), so
// the data behind a poisoned lock is still consistent.
fn lock_ignoring_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read a UTF-8 file, treating a missing file as `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            Err(StoreError::corrupt(path, "not valid UTF-8"))
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Replace `path` with `bytes`: write a sibling temp file, then rename over.
///
/// Readers see either the old or the new contents, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let write = || -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(&tmp, e));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}
