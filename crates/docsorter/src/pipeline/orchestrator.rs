use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, info_span, Instrument};

use crate::analysis::Analyzer;
use crate::config::Config;
use crate::error::WatcherError;
use crate::extract::TextExtractor;
use crate::filer::ConflictSafeFiler;
use crate::media;
use crate::observe::{PipelineEvent, PipelineEventKind, PipelineObserver};
use crate::sanitize;
use crate::shutdown::ShutdownListener;
use crate::stabilize::StabilityPolicy;
use crate::watcher::{startup_scan, CandidateFilter, DirectoryWatcher, WatchEvent, WatchOptions};

use super::runner::{RetryPolicy, StageRunner};
use super::state::{FileOutcome, FileState};
use super::tracked::{TrackedEntry, TrackedFiles};

/// Terminal counts for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub filed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: usize,
}

impl RunSummary {
    fn record(&mut self, state: FileState) {
        match state {
            FileState::Filed => self.filed += 1,
            FileState::Skipped => self.skipped += 1,
            FileState::Interrupted => self.interrupted += 1,
            _ => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.filed + self.failed + self.skipped + self.interrupted
    }
}

/// Sent by a per-file task when it ends, even if it panicked.
struct Completion {
    path: PathBuf,
    state: FileState,
}

struct CompletionGuard {
    sender: mpsc::UnboundedSender<Completion>,
    path: PathBuf,
    state: Option<FileState>,
}

impl CompletionGuard {
    fn complete(mut self, outcome: &FileOutcome) {
        self.state = Some(outcome.state());
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let state = self.state.unwrap_or_else(|| {
            error!(filename = %sanitize::redact_path(&self.path), "pipeline task ended abnormally");
            FileState::Failed
        });
        let _ = self.sender.send(Completion {
            path: std::mem::take(&mut self.path),
            state,
        });
    }
}

/// Owns the tracked set and spawns one task per detected file.
pub struct Orchestrator {
    filter: CandidateFilter,
    queue_capacity: usize,
    runner: Arc<StageRunner>,
    observer: Arc<dyn PipelineObserver>,
    tracked: TrackedFiles,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        extractor: Arc<dyn TextExtractor>,
        analyzer: Arc<dyn Analyzer>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        let runner = StageRunner {
            stability: StabilityPolicy::new(
                config.stabilization.delay(),
                config.stabilization.max_retries,
            ),
            retry: RetryPolicy {
                extraction_attempts: config.extraction.max_attempts,
                unreachable_retries: config.analysis.unreachable_retries,
                malformed_retries: config.analysis.malformed_retries,
                backoff: config.analysis.backoff(),
            },
            extractor,
            extraction_slots: Arc::new(Semaphore::new(config.ocr.max_concurrent.max(1))),
            analyzer,
            filer: Arc::new(ConflictSafeFiler::new(config.filing.max_suffix)),
            target_root: config.target_root.clone(),
            observer: Arc::clone(&observer),
        };

        Self {
            filter: CandidateFilter::from_config(config),
            queue_capacity: config.watcher.queue_capacity.max(1),
            runner: Arc::new(runner),
            observer,
            tracked: TrackedFiles::new(),
        }
    }

    /// Read-only view of files currently in flight.
    pub fn tracked(&self) -> TrackedFiles {
        self.tracked.clone()
    }

    /// Dispatcher loop. Returns when the event queue is closed (or shutdown
    /// is requested) and every in-flight file has reached a terminal state.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<WatchEvent>,
        shutdown: ShutdownListener,
    ) -> RunSummary {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut stop = shutdown.clone();
        let mut summary = RunSummary::default();
        let mut accepting = true;
        let mut in_flight = 0usize;

        while accepting || in_flight > 0 {
            tokio::select! {
                Some(done) = done_rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    self.tracked.remove(&done.path);
                    summary.record(done.state);
                }
                _ = stop.triggered(), if accepting => {
                    info!(in_flight, "Shutdown requested, no longer accepting files");
                    accepting = false;
                }
                event = events.recv(), if accepting => match event {
                    Some(event) => {
                        if self.dispatch(event, &done_tx, &shutdown, &mut summary) {
                            in_flight += 1;
                        }
                    }
                    None => {
                        debug!("Event queue closed");
                        accepting = false;
                    }
                },
                else => break,
            }
        }

        info!(
            filed = summary.filed,
            failed = summary.failed,
            skipped = summary.skipped,
            interrupted = summary.interrupted,
            "Dispatcher finished"
        );
        summary
    }

    /// Starts a pipeline task for `event` unless the path is already in
    /// flight or not a candidate. Returns true if a task was spawned.
    fn dispatch(
        &self,
        event: WatchEvent,
        done_tx: &mpsc::UnboundedSender<Completion>,
        shutdown: &ShutdownListener,
        summary: &mut RunSummary,
    ) -> bool {
        let path = event.path;

        if self.tracked.contains(&path) {
            debug!(filename = %sanitize::redact_path(&path), "already in flight, ignoring");
            return false;
        }

        let media_type = match self.filter.classify(&path) {
            Ok(media_type) => media_type,
            Err(reason) => {
                debug!(
                    filename = %sanitize::redact_path(&path),
                    mime = ?media::guess_mime(&path),
                    %reason,
                    "not a candidate"
                );
                let file_id = uuid::Uuid::new_v4();
                self.observer.on_event(&PipelineEvent::new(
                    file_id,
                    &path,
                    PipelineEventKind::Skipped { reason },
                ));
                summary.record(FileState::Skipped);
                return false;
            }
        };

        let entry = Arc::new(TrackedEntry::new(path.clone(), media_type));
        if !self.tracked.insert(Arc::clone(&entry)) {
            return false;
        }

        self.observer.on_event(&PipelineEvent::new(
            entry.id(),
            entry.path(),
            PipelineEventKind::Detected { media_type },
        ));

        let span = info_span!(
            "pipeline",
            file_id = %entry.id(),
            filename = %sanitize::redact_path(&path),
            path_hash = %sanitize::hash_path(&path),
            kind = ?event.kind,
        );
        let runner = Arc::clone(&self.runner);
        let listener = shutdown.clone();
        let guard = CompletionGuard {
            sender: done_tx.clone(),
            path,
            state: None,
        };

        tokio::spawn(
            async move {
                let outcome = runner.run(&entry, listener).await;
                guard.complete(&outcome);
            }
            .instrument(span),
        );
        true
    }

    /// Processes everything currently in the inbox once, then returns.
    pub async fn run_backlog(
        &self,
        inbox: &Path,
        shutdown: ShutdownListener,
    ) -> Result<RunSummary, WatcherError> {
        let backlog = startup_scan(inbox, &self.filter)?;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        tokio::spawn(feed_backlog(backlog, tx));
        Ok(self.run(rx, shutdown).await)
    }

    /// Backlog first, then live events until shutdown.
    pub async fn run_watching(
        &self,
        inbox: &Path,
        options: WatchOptions,
        shutdown: ShutdownListener,
    ) -> Result<RunSummary, WatcherError> {
        let backlog = startup_scan(inbox, &self.filter)?;
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let watcher = DirectoryWatcher::spawn(inbox, options, tx.clone(), shutdown.clone())?;
        tokio::spawn(feed_backlog(backlog, tx));

        let summary = self.run(rx, shutdown).await;

        if let Err(e) = tokio::task::spawn_blocking(move || watcher.join()).await {
            error!("Failed to join watcher thread: {}", e);
        }
        Ok(summary)
    }
}

async fn feed_backlog(paths: Vec<PathBuf>, sender: mpsc::Sender<WatchEvent>) {
    for path in paths {
        if sender.send(WatchEvent::backlog(path)).await.is_err() {
            break;
        }
    }
}
