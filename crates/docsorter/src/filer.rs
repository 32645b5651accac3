//! Conflict-safe filing: moves a source file into its category directory
//! without ever replacing an existing file.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::error::FilingError;

pub struct ConflictSafeFiler {
    max_suffix: u32,
    dir_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ConflictSafeFiler {
    pub fn new(max_suffix: u32) -> Self {
        Self {
            max_suffix: max_suffix.max(1),
            dir_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, directory: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .dir_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(directory.to_path_buf()).or_default())
    }

    /// Forgets the lock for `directory` once no other filing holds it.
    /// Checked under the map lock, so a concurrent `lock_for` either sees
    /// the old entry (and keeps it alive) or creates a fresh one.
    fn release(&self, directory: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .dir_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(directory);
        }
    }

    #[cfg(test)]
    fn locked_directories(&self) -> usize {
        self.dir_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Candidate file name for attempt `n` (1-based): `base.ext`, then
    /// `base_2.ext`, `base_3.ext`, ...
    pub fn candidate_name(base: &str, extension: &str, n: u32) -> String {
        if n <= 1 {
            format!("{}{}", base, extension)
        } else {
            format!("{}_{}{}", base, n, extension)
        }
    }

    /// Moves `source` to `directory/base+extension`, adding a numeric suffix
    /// if that name is taken. Filing into the same directory is serialized,
    /// and each candidate is reserved with an exclusive create before the
    /// move, so two sources can never land on the same name.
    pub fn file(
        &self,
        source: &Path,
        directory: &Path,
        base: &str,
        extension: &str,
    ) -> Result<PathBuf, FilingError> {
        std::fs::create_dir_all(directory).map_err(|e| FilingError::CreateDirectory {
            path: directory.to_path_buf(),
            source: e,
        })?;

        // Fail before reserving anything if the source is gone.
        std::fs::symlink_metadata(source).map_err(|e| FilingError::MoveFile {
            from: source.to_path_buf(),
            to: directory.to_path_buf(),
            source: e,
        })?;

        let lock = self.lock_for(directory);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.place(source, directory, base, extension)
        };
        self.release(directory, lock);
        result
    }

    /// Reserves the first free candidate name and moves `source` onto it.
    /// Callers hold the directory lock.
    fn place(
        &self,
        source: &Path,
        directory: &Path,
        base: &str,
        extension: &str,
    ) -> Result<PathBuf, FilingError> {
        for n in 1..=self.max_suffix {
            let candidate = directory.join(Self::candidate_name(base, extension, n));

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(reservation) => {
                    drop(reservation);
                    if n > 1 {
                        debug!("Name conflict resolved with suffix _{}", n);
                    }
                    return match move_onto(source, &candidate) {
                        Ok(()) => {
                            info!("Filed {} -> {}", source.display(), candidate.display());
                            Ok(candidate)
                        }
                        Err(e) => {
                            if let Err(cleanup) = std::fs::remove_file(&candidate) {
                                warn!(
                                    "Failed to remove reservation {}: {}",
                                    candidate.display(),
                                    cleanup
                                );
                            }
                            Err(e)
                        }
                    };
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(FilingError::Reserve {
                        path: candidate,
                        source: e,
                    })
                }
            }
        }

        Err(FilingError::ConflictExhausted {
            directory: directory.to_path_buf(),
            base: base.to_string(),
            extension: extension.to_string(),
            attempts: self.max_suffix,
        })
    }

    /// Async wrapper that runs the filesystem work on the blocking pool.
    pub async fn file_async(
        self: &Arc<Self>,
        source: PathBuf,
        directory: PathBuf,
        base: String,
        extension: String,
    ) -> Result<PathBuf, FilingError> {
        let filer = Arc::clone(self);
        let from = source.clone();
        tokio::task::spawn_blocking(move || filer.file(&source, &directory, &base, &extension))
            .await
            .unwrap_or_else(|join_err| {
                Err(FilingError::MoveFile {
                    from,
                    to: PathBuf::new(),
                    source: std::io::Error::other(join_err.to_string()),
                })
            })
    }
}

/// Replaces the (empty, reserved) `dst` with `src`. Rename first; fall back
/// to copy + remove for cross-device moves. On fallback failure the source
/// stays where it was.
fn move_onto(src: &Path, dst: &Path) -> Result<(), FilingError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let move_err = |e: std::io::Error| FilingError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    std::fs::copy(src, dst).map_err(move_err)?;
    if let Err(e) = std::fs::remove_file(src) {
        // Keep exactly one copy: the original in the inbox.
        let _ = std::fs::remove_file(dst);
        return Err(move_err(e));
    }
    Ok(())
}
