//! Per-file state machine and the dispatcher that drives it.

pub mod orchestrator;
pub mod runner;
pub mod state;
pub mod tracked;

pub use orchestrator::{Orchestrator, RunSummary};
pub use runner::RetryPolicy;
pub use state::{FailureReason, FileOutcome, FileState, SkipReason};
pub use tracked::{TrackedFiles, WatchedFile};
