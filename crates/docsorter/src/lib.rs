pub mod analysis;
pub mod config;
pub mod error;
pub mod extract;
pub mod filer;
pub mod media;
pub mod observe;
pub mod pipeline;
pub mod sanitize;
pub mod shutdown;
pub mod stabilize;
pub mod watcher;

pub use analysis::{AnalysisBackend, AnalysisResult, Analyzer, DocumentAnalyzer, OllamaClient};
pub use config::{load_config, load_config_from_str, Config};
pub use error::{AnalysisError, ConfigError, ExtractionError, FilingError, WatcherError};
pub use extract::{
    ContentExtractor, ExtractionBackend, ExtractionResult, SourceMethod, TesseractBackend,
    TextExtractor,
};
pub use filer::ConflictSafeFiler;
pub use media::MediaType;
pub use observe::{
    BroadcastObserver, FanoutObserver, NoopObserver, PipelineEvent, PipelineEventKind,
    PipelineObserver, TracingObserver,
};
pub use pipeline::{
    FailureReason, FileOutcome, FileState, Orchestrator, RunSummary, SkipReason, TrackedFiles,
    WatchedFile,
};
pub use shutdown::{Shutdown, ShutdownListener};
pub use watcher::{
    startup_scan, CandidateFilter, DirectoryWatcher, WatchEvent, WatchEventKind, WatchOptions,
};
