//! The set of files currently moving through the pipeline.
//!
//! Only the dispatcher inserts and removes entries. Each per-file task
//! updates the status cell of its own entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::media::MediaType;

use super::state::FileState;

/// Point-in-time view of one tracked file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedFile {
    pub id: Uuid,
    pub path: PathBuf,
    pub media_type: MediaType,
    pub first_seen_at: DateTime<Utc>,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub state: FileState,
    /// Attempt number within the current stage.
    pub attempt: u32,
}

#[derive(Debug)]
struct Status {
    state: FileState,
    attempt: u32,
    last_modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct TrackedEntry {
    id: Uuid,
    path: PathBuf,
    media_type: MediaType,
    first_seen_at: DateTime<Utc>,
    status: Mutex<Status>,
}

impl TrackedEntry {
    pub fn new(path: PathBuf, media_type: MediaType) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            media_type,
            first_seen_at: Utc::now(),
            status: Mutex::new(Status {
                state: FileState::Detected,
                attempt: 0,
                last_modified_at: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn with_status<R>(&self, f: impl FnOnce(&mut Status) -> R) -> R {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut status)
    }

    pub fn state(&self) -> FileState {
        self.with_status(|s| s.state)
    }

    /// Moves to `to`, resets the attempt counter and returns the old state.
    pub fn set_state(&self, to: FileState) -> FileState {
        self.with_status(|s| {
            s.attempt = 0;
            std::mem::replace(&mut s.state, to)
        })
    }

    pub fn set_attempt(&self, attempt: u32) {
        self.with_status(|s| s.attempt = attempt);
    }

    pub fn set_last_modified(&self, at: DateTime<Utc>) {
        self.with_status(|s| s.last_modified_at = Some(at));
    }

    pub fn snapshot(&self) -> WatchedFile {
        self.with_status(|s| WatchedFile {
            id: self.id,
            path: self.path.clone(),
            media_type: self.media_type,
            first_seen_at: self.first_seen_at,
            last_modified_at: s.last_modified_at,
            state: s.state,
            attempt: s.attempt,
        })
    }
}

/// Shared, read-only handle to the tracked set.
#[derive(Debug, Clone, Default)]
pub struct TrackedFiles {
    inner: Arc<RwLock<HashMap<PathBuf, Arc<TrackedEntry>>>>,
}

impl TrackedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read(|map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read(|map| map.contains_key(path))
    }

    pub fn get(&self, path: &Path) -> Option<WatchedFile> {
        self.read(|map| map.get(path).map(|entry| entry.snapshot()))
    }

    /// All tracked files, oldest first.
    pub fn snapshot(&self) -> Vec<WatchedFile> {
        let mut files: Vec<WatchedFile> =
            self.read(|map| map.values().map(|entry| entry.snapshot()).collect());
        files.sort_by_key(|f| f.first_seen_at);
        files
    }

    fn read<R>(&self, f: impl FnOnce(&HashMap<PathBuf, Arc<TrackedEntry>>) -> R) -> R {
        let map = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&map)
    }

    /// Returns false (and does nothing) if the path is already tracked.
    pub(crate) fn insert(&self, entry: Arc<TrackedEntry>) -> bool {
        let mut map = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if map.contains_key(entry.path()) {
            return false;
        }
        map.insert(entry.path().to_path_buf(), entry);
        true
    }

    pub(crate) fn remove(&self, path: &Path) -> Option<Arc<TrackedEntry>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(path)
    }
}
