//! Fake collaborators for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use docsorter::analysis::{AnalysisBackend, ConnectionError};
use docsorter::{
    ExtractionError, ExtractionResult, FailureReason, FileState, MediaType, PipelineEvent,
    PipelineEventKind, PipelineObserver, Shutdown, SkipReason, SourceMethod, TextExtractor,
};

/// Extractor that returns the file's own contents as "recognized" text.
#[derive(Default)]
pub struct FakeExtractor {
    /// Errors to return, per file name, before succeeding.
    scripted_errors: Mutex<HashMap<String, VecDeque<ExtractionError>>>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<PathBuf, usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` first, simulating OCR work.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue an error for the next extraction of `filename`.
    pub fn fail_next(self, filename: &str, error: ExtractionError) -> Self {
        self.scripted_errors
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_default()
            .push_back(error);
        self
    }

    pub fn calls_for(&self, path: &Path) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of extractions observed running at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl TextExtractor for FakeExtractor {
    fn extract(&self, path: &Path, _media: MediaType) -> Result<ExtractionResult, ExtractionError> {
        *self.calls.lock().unwrap().entry(path.to_path_buf()).or_default() += 1;

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(err) = self
            .scripted_errors
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }

        let text = std::fs::read_to_string(path).map_err(|e| ExtractionError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        if text.trim().is_empty() {
            return Err(ExtractionError::NoContent(path.to_path_buf()));
        }
        Ok(ExtractionResult {
            text,
            source_method: SourceMethod::Ocr,
        })
    }
}

type Responder = Box<dyn Fn(&str, usize) -> Result<String, ConnectionError> + Send + Sync>;

/// Analysis service stand-in that answers from a closure.
pub struct ScriptedBackend {
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// `responder` gets the prompt and the 0-based call number.
    pub fn new(
        responder: impl Fn(&str, usize) -> Result<String, ConnectionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same raw body.
    pub fn always(raw: &str) -> Self {
        let raw = raw.to_string();
        Self::new(move |_, _| Ok(raw.clone()))
    }

    /// Answers `{category, suggestedName}` for every request.
    pub fn classify_as(category: &str, name: &str) -> Self {
        Self::always(&answer(category, name))
    }

    /// Connection errors for the first `failures` calls, then `raw`.
    pub fn unreachable_then(failures: usize, raw: &str) -> Self {
        let raw = raw.to_string();
        Self::new(move |_, call| {
            if call < failures {
                Err(ConnectionError("connection refused".to_string()))
            } else {
                Ok(raw.clone())
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

/// Builds a well-formed service answer.
pub fn answer(category: &str, name: &str) -> String {
    serde_json::json!({ "category": category, "suggestedName": name }).to_string()
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn request(
        &self,
        prompt: &str,
        _model_name: &str,
        _service_url: &str,
    ) -> Result<String, ConnectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.responder)(prompt, call)
    }

    async fn check_connection(&self, _service_url: &str) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Records every event; optionally triggers shutdown after the n-th filing.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
    stop_after_filed: Option<(usize, Shutdown)>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stopping_after_filed(count: usize, shutdown: Shutdown) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            stop_after_filed: Some((count, shutdown)),
        }
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, path: &Path) -> Vec<PipelineEventKind> {
        self.events()
            .into_iter()
            .filter(|e| e.path == path)
            .map(|e| e.kind)
            .collect()
    }

    /// States entered by `path`, in order, starting with `Detected`.
    pub fn states_for(&self, path: &Path) -> Vec<FileState> {
        let mut states = Vec::new();
        for kind in self.events_for(path) {
            match kind {
                PipelineEventKind::Detected { .. } => states.push(FileState::Detected),
                PipelineEventKind::Transition { to, .. } => states.push(to),
                PipelineEventKind::Filed { .. } => states.push(FileState::Filed),
                PipelineEventKind::Failed { .. } => states.push(FileState::Failed),
                PipelineEventKind::Skipped { .. } => states.push(FileState::Skipped),
                PipelineEventKind::Interrupted { .. } => states.push(FileState::Interrupted),
            }
        }
        states
    }

    pub fn failure_for(&self, path: &Path) -> Option<FailureReason> {
        self.events_for(path).into_iter().find_map(|k| match k {
            PipelineEventKind::Failed { reason, .. } => Some(reason),
            _ => None,
        })
    }

    pub fn skip_for(&self, path: &Path) -> Option<SkipReason> {
        self.events_for(path).into_iter().find_map(|k| match k {
            PipelineEventKind::Skipped { reason } => Some(reason),
            _ => None,
        })
    }

    pub fn count_detected(&self, path: &Path) -> usize {
        self.events_for(path)
            .iter()
            .filter(|k| matches!(k, PipelineEventKind::Detected { .. }))
            .count()
    }

    pub fn filed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e.kind, PipelineEventKind::Filed { .. }))
            .count()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        let filed = {
            let mut events = self.events.lock().unwrap();
            events.push(event.clone());
            events
                .iter()
                .filter(|e| matches!(e.kind, PipelineEventKind::Filed { .. }))
                .count()
        };
        if let Some((count, shutdown)) = &self.stop_after_filed {
            if filed >= *count {
                shutdown.trigger();
            }
        }
    }
}
