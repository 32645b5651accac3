//! Directory watcher: startup backlog scan plus live change detection.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::WatcherError;
use crate::media::MediaType;
use crate::pipeline::SkipReason;
use crate::shutdown::ShutdownListener;

/// Decides whether an inbox entry is a processing candidate.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    extensions: HashSet<String>,
    placeholder_suffixes: Vec<String>,
    ignore_hidden: bool,
}

impl CandidateFilter {
    /// `extensions` may be given with or without a leading dot, in any case.
    pub fn new<E, P>(extensions: E, placeholder_suffixes: P, ignore_hidden: bool) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            placeholder_suffixes: placeholder_suffixes
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            ignore_hidden,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.supported_extensions.iter(),
            config.placeholder_suffixes.iter(),
            config.ignore_hidden,
        )
    }

    pub fn classify(&self, path: &Path) -> Result<MediaType, SkipReason> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(SkipReason::UnsupportedType)?;
        let lower = name.to_lowercase();

        if self
            .placeholder_suffixes
            .iter()
            .any(|suffix| lower.ends_with(suffix.as_str()))
        {
            return Err(SkipReason::Placeholder);
        }

        if self.ignore_hidden && name.starts_with('.') {
            return Err(SkipReason::Hidden);
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or(SkipReason::UnsupportedType)?;

        if !self.extensions.contains(&ext) {
            return Err(SkipReason::UnsupportedType);
        }

        MediaType::from_extension(&ext).ok_or(SkipReason::UnsupportedType)
    }
}

/// Lists candidate files directly under `inbox`, sorted by name.
///
/// An inaccessible inbox is fatal. Unreadable individual entries are logged
/// and skipped.
pub fn startup_scan(inbox: &Path, filter: &CandidateFilter) -> Result<Vec<PathBuf>, WatcherError> {
    std::fs::read_dir(inbox).map_err(|e| WatcherError::InboxUnavailable {
        path: inbox.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut candidates = Vec::new();

    for entry in WalkDir::new(inbox)
        .min_depth(1)
        .max_depth(1) // Only the top level; category folders may live below.
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable inbox entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        match filter.classify(path) {
            Ok(_) => {
                debug!("Found document: {}", path.display());
                candidates.push(path.to_path_buf());
            }
            Err(reason) => debug!("Ignoring {} ({})", path.display(), reason),
        }
    }

    info!(
        "Scanned {} documents in {}",
        candidates.len(),
        inbox.display()
    );
    Ok(candidates)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Found by the startup scan.
    Backlog,
    /// Reported by the live watcher.
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn backlog(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Backlog,
        }
    }

    pub fn live(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Live,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub debounce: Duration,
    /// A path already emitted within this window is not emitted again.
    pub cooldown: Duration,
}

impl WatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.watcher.poll_interval_ms),
            debounce: Duration::from_millis(config.watcher.debounce_ms),
            cooldown: Duration::from_millis(config.watcher.cooldown_ms),
        }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            debounce: Duration::from_millis(500),
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Suppresses repeat emissions of the same path within a cooldown window.
#[derive(Debug)]
pub struct CooldownFilter {
    window: Duration,
    last_emitted: HashMap<PathBuf, Instant>,
}

impl CooldownFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// Returns true if `path` should be emitted at `now`, and records it.
    pub fn admit(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.last_emitted
            .retain(|_, at| now.saturating_duration_since(*at) < window);

        if self.last_emitted.contains_key(path) {
            return false;
        }
        self.last_emitted.insert(path.to_path_buf(), now);
        true
    }
}

/// Live watcher running notify's debounced poll watcher on its own thread.
pub struct DirectoryWatcher {
    handle: Option<JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Starts watching `inbox` (non-recursive) and forwards every changed
    /// regular file into `sender`. Returns once the watch is established.
    ///
    /// The thread exits when shutdown is triggered or the receiver is dropped.
    pub fn spawn(
        inbox: &Path,
        options: WatchOptions,
        sender: mpsc::Sender<WatchEvent>,
        shutdown: ShutdownListener,
    ) -> Result<Self, WatcherError> {
        if !inbox.is_dir() {
            return Err(WatcherError::WatchFailed {
                path: inbox.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let inbox = inbox.to_path_buf();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), WatcherError>>(1);

        let handle = std::thread::Builder::new()
            .name("docsorter-watcher".to_string())
            .spawn(move || watch_loop(inbox, options, sender, shutdown, ready_tx))
            .map_err(|e| WatcherError::WatchFailed {
                path: PathBuf::new(),
                reason: format!("failed to spawn watcher thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(WatcherError::WatchFailed {
                    path: PathBuf::new(),
                    reason: "watcher thread exited during startup".to_string(),
                })
            }
        }
    }

    /// Waits for the watcher thread to finish.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Watcher thread panicked");
            }
        }
    }
}

fn watch_loop(
    inbox: PathBuf,
    options: WatchOptions,
    sender: mpsc::Sender<WatchEvent>,
    shutdown: ShutdownListener,
    ready: std_mpsc::SyncSender<Result<(), WatcherError>>,
) {
    let watch_failed = |e: notify::Error| WatcherError::WatchFailed {
        path: inbox.clone(),
        reason: e.to_string(),
    };

    // PollWatcher works on network shares and container mounts.
    let poll_config = NotifyConfig::default().with_poll_interval(options.poll_interval);
    let debouncer_config = DebouncerConfig::default()
        .with_timeout(options.debounce)
        .with_notify_config(poll_config);

    let (tx, rx) = std_mpsc::channel();

    let mut debouncer = match new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx) {
        Ok(debouncer) => debouncer,
        Err(e) => {
            let _ = ready.send(Err(watch_failed(e)));
            return;
        }
    };

    if let Err(e) = debouncer
        .watcher()
        .watch(&inbox, RecursiveMode::NonRecursive)
    {
        let _ = ready.send(Err(watch_failed(e)));
        return;
    }

    info!("Watching directory: {}", inbox.display());
    let _ = ready.send(Ok(()));

    let mut cooldown = CooldownFilter::new(options.cooldown);

    loop {
        if shutdown.is_triggered() {
            info!("Watcher shutting down...");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(events)) => {
                for event in events {
                    if !matches!(event.kind, DebouncedEventKind::Any) {
                        continue;
                    }
                    // Removals and directories show up too; only existing files matter.
                    if !event.path.is_file() {
                        continue;
                    }
                    if !cooldown.admit(&event.path, Instant::now()) {
                        debug!("Suppressing repeat event for {}", event.path.display());
                        continue;
                    }

                    debug!("Change detected: {}", event.path.display());
                    if sender.blocking_send(WatchEvent::live(event.path)).is_err() {
                        info!("Event queue closed, stopping watcher");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Watch error: {:?}", e);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                error!("Watch channel disconnected");
                break;
            }
        }
    }
}
