use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

use crate::analysis::{AnalysisResult, Analyzer};
use crate::error::AnalysisError;
use crate::extract::{ExtractionResult, TextExtractor};
use crate::filer::ConflictSafeFiler;
use crate::media;
use crate::observe::{PipelineEvent, PipelineEventKind, PipelineObserver};
use crate::shutdown::ShutdownListener;
use crate::stabilize::{await_stable, StabilityOutcome, StabilityPolicy};

use super::state::{FailureReason, FileOutcome, FileState, SkipReason};
use super::tracked::TrackedEntry;

/// Early exit from a stage with the file's terminal outcome.
type Stage<T> = Result<T, FileOutcome>;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total extraction attempts for retryable extraction errors.
    pub extraction_attempts: u32,
    pub unreachable_retries: u32,
    pub malformed_retries: u32,
    /// Base delay; doubled after each failed attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << retry.min(6))
    }
}

/// Runs one file through stabilize → extract → analyze → file.
pub struct StageRunner {
    pub(crate) stability: StabilityPolicy,
    pub(crate) retry: RetryPolicy,
    pub(crate) extractor: Arc<dyn TextExtractor>,
    pub(crate) extraction_slots: Arc<Semaphore>,
    pub(crate) analyzer: Arc<dyn Analyzer>,
    pub(crate) filer: Arc<ConflictSafeFiler>,
    pub(crate) target_root: PathBuf,
    pub(crate) observer: Arc<dyn PipelineObserver>,
}

impl StageRunner {
    /// Drives `entry` to a terminal state. Shutdown is honored at every
    /// suspension point before filing; once filing starts it completes.
    pub async fn run(&self, entry: &TrackedEntry, mut shutdown: ShutdownListener) -> FileOutcome {
        let outcome = match self.drive(entry, &mut shutdown).await {
            Ok(outcome) | Err(outcome) => outcome,
        };
        self.finish(entry, &outcome);
        outcome
    }

    async fn drive(
        &self,
        entry: &TrackedEntry,
        shutdown: &mut ShutdownListener,
    ) -> Stage<FileOutcome> {
        self.transition(entry, FileState::Stabilizing);
        self.stabilize(entry, shutdown)
            .instrument(info_span!("stabilize"))
            .await?;

        self.transition(entry, FileState::Extracting);
        let extraction = self
            .extract(entry, shutdown)
            .instrument(info_span!("extract"))
            .await?;
        debug!(
            chars = extraction.text.len(),
            method = ?extraction.source_method,
            "text extracted"
        );

        self.transition(entry, FileState::Analyzing);
        let captured = captured_date(entry).await;
        let analysis = self
            .analyze(entry, &extraction, captured, shutdown)
            .instrument(info_span!("analyze"))
            .await?;

        // Last point where stopping leaves nothing half done.
        if shutdown.is_triggered() {
            return Err(interrupted(entry));
        }

        self.transition(entry, FileState::Filing);
        self.file(entry, analysis)
            .instrument(info_span!("file"))
            .await
    }

    async fn stabilize(&self, entry: &TrackedEntry, shutdown: &mut ShutdownListener) -> Stage<()> {
        match await_stable(entry.path(), self.stability, shutdown).await {
            StabilityOutcome::Stable => {
                if let Ok(modified) = tokio::fs::metadata(entry.path())
                    .await
                    .and_then(|m| m.modified())
                {
                    entry.set_last_modified(DateTime::<Utc>::from(modified));
                }
                Ok(())
            }
            StabilityOutcome::Vanished => Err(FileOutcome::Skipped(SkipReason::Vanished)),
            StabilityOutcome::Unstable { checks } => Err(FileOutcome::failed(
                FailureReason::UnstableTimeout,
                format!("file still changing after {} checks", checks),
            )),
            StabilityOutcome::Interrupted => Err(interrupted(entry)),
        }
    }

    async fn extract(
        &self,
        entry: &TrackedEntry,
        shutdown: &mut ShutdownListener,
    ) -> Stage<ExtractionResult> {
        let attempts = self.retry.extraction_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            entry.set_attempt(attempt);

            let permit = match shutdown
                .run_until(Arc::clone(&self.extraction_slots).acquire_owned())
                .await
            {
                None => return Err(interrupted(entry)),
                Some(Ok(permit)) => permit,
                Some(Err(_)) => {
                    return Err(FileOutcome::failed(
                        FailureReason::ExtractionFailed,
                        "extraction pool closed",
                    ))
                }
            };

            let extractor = Arc::clone(&self.extractor);
            let path = entry.path().to_path_buf();
            let media_type = entry.media_type();
            let span = tracing::Span::current();

            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let _span = span.entered();
                extractor.extract(&path, media_type)
            })
            .await;

            match joined {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) if !e.is_retryable() => {
                    return Err(FileOutcome::failed(FailureReason::NoContent, e.to_string()))
                }
                Ok(Err(e)) => {
                    warn!(attempt, attempts, "extraction failed: {}", e);
                    last_error = e.to_string();
                }
                Err(e) => {
                    warn!(attempt, attempts, "extraction task aborted: {}", e);
                    last_error = format!("extraction task aborted: {}", e);
                }
            }

            if attempt < attempts && !shutdown.sleep(self.retry.delay_for(attempt - 1)).await {
                return Err(interrupted(entry));
            }
        }

        Err(FileOutcome::failed(FailureReason::ExtractionFailed, last_error))
    }

    async fn analyze(
        &self,
        entry: &TrackedEntry,
        extraction: &ExtractionResult,
        captured: Option<NaiveDate>,
        shutdown: &mut ShutdownListener,
    ) -> Stage<AnalysisResult> {
        let mut unreachable = 0u32;
        let mut malformed = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            entry.set_attempt(attempt);

            let result = shutdown
                .run_until(
                    self.analyzer
                        .analyze(&extraction.text, entry.media_type(), captured),
                )
                .await
                .ok_or_else(|| interrupted(entry))?;

            let err = match result {
                Ok(analysis) => return Ok(analysis),
                Err(err) => err,
            };

            match &err {
                AnalysisError::Unreachable(_) if unreachable < self.retry.unreachable_retries => {
                    let delay = self.retry.delay_for(unreachable);
                    unreachable += 1;
                    warn!(
                        retry = unreachable,
                        delay_ms = delay.as_millis() as u64,
                        "analysis service unreachable, retrying: {}",
                        err
                    );
                    if !shutdown.sleep(delay).await {
                        return Err(interrupted(entry));
                    }
                }
                AnalysisError::MalformedResponse(_) if malformed < self.retry.malformed_retries => {
                    malformed += 1;
                    warn!(retry = malformed, "malformed analysis response, retrying: {}", err);
                }
                _ => {
                    return Err(FileOutcome::failed(
                        FailureReason::from(&err),
                        err.to_string(),
                    ))
                }
            }
        }
    }

    async fn file(&self, entry: &TrackedEntry, analysis: AnalysisResult) -> Stage<FileOutcome> {
        let directory = self.target_root.join(&analysis.category);
        let extension = media::dotted_extension(entry.path());

        match self
            .filer
            .file_async(
                entry.path().to_path_buf(),
                directory,
                analysis.base_name,
                extension,
            )
            .await
        {
            Ok(final_path) => Ok(FileOutcome::Filed {
                final_path,
                category: analysis.category,
            }),
            Err(e) => Err(FileOutcome::failed(FailureReason::from(&e), e.to_string())),
        }
    }

    fn transition(&self, entry: &TrackedEntry, to: FileState) {
        let from = entry.set_state(to);
        self.observer.on_event(&PipelineEvent::new(
            entry.id(),
            entry.path(),
            PipelineEventKind::Transition { from, to },
        ));
    }

    fn finish(&self, entry: &TrackedEntry, outcome: &FileOutcome) {
        entry.set_state(outcome.state());
        let kind = match outcome {
            FileOutcome::Filed {
                final_path,
                category,
            } => PipelineEventKind::Filed {
                final_path: final_path.clone(),
                category: category.clone(),
            },
            FileOutcome::Failed { reason, message } => PipelineEventKind::Failed {
                reason: *reason,
                message: message.clone(),
            },
            FileOutcome::Skipped(reason) => PipelineEventKind::Skipped { reason: *reason },
            FileOutcome::Interrupted { during } => {
                PipelineEventKind::Interrupted { during: *during }
            }
        };
        self.observer
            .on_event(&PipelineEvent::new(entry.id(), entry.path(), kind));
    }
}

fn interrupted(entry: &TrackedEntry) -> FileOutcome {
    FileOutcome::Interrupted {
        during: entry.state(),
    }
}

/// The file's modification date in local time, used as a dating hint.
async fn captured_date(entry: &TrackedEntry) -> Option<NaiveDate> {
    let modified = tokio::fs::metadata(entry.path()).await.ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified).date_naive())
}
