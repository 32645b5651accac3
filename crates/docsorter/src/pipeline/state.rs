use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, FilingError};

/// Per-file pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Detected,
    Stabilizing,
    Extracting,
    Analyzing,
    Filing,
    Filed,
    Failed,
    Skipped,
    /// Stopped by shutdown before filing; the source was not touched.
    Interrupted,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filed | Self::Failed | Self::Skipped | Self::Interrupted
        )
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileState::Detected => write!(f, "Detected"),
            FileState::Stabilizing => write!(f, "Stabilizing"),
            FileState::Extracting => write!(f, "Extracting"),
            FileState::Analyzing => write!(f, "Analyzing"),
            FileState::Filing => write!(f, "Filing"),
            FileState::Filed => write!(f, "Filed"),
            FileState::Failed => write!(f, "Failed"),
            FileState::Skipped => write!(f, "Skipped"),
            FileState::Interrupted => write!(f, "Interrupted"),
        }
    }
}

/// Why a file ended in `Failed`. The file stays in the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UnstableTimeout,
    NoContent,
    ExtractionFailed,
    AnalysisUnreachable,
    AnalysisMalformed,
    FilingConflictExhausted,
    FilingIoError,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::UnstableTimeout => "unstable_timeout",
            FailureReason::NoContent => "no_content",
            FailureReason::ExtractionFailed => "extraction_failed",
            FailureReason::AnalysisUnreachable => "analysis_unreachable",
            FailureReason::AnalysisMalformed => "analysis_malformed",
            FailureReason::FilingConflictExhausted => "filing_conflict_exhausted",
            FailureReason::FilingIoError => "filing_io_error",
        };
        f.write_str(s)
    }
}

impl From<&AnalysisError> for FailureReason {
    fn from(err: &AnalysisError) -> Self {
        match err {
            AnalysisError::Unreachable(_) => FailureReason::AnalysisUnreachable,
            AnalysisError::MalformedResponse(_) => FailureReason::AnalysisMalformed,
        }
    }
}

impl From<&FilingError> for FailureReason {
    fn from(err: &FilingError) -> Self {
        match err {
            FilingError::ConflictExhausted { .. } => FailureReason::FilingConflictExhausted,
            _ => FailureReason::FilingIoError,
        }
    }
}

/// Why a file was dropped without processing. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnsupportedType,
    Placeholder,
    Hidden,
    Vanished,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::UnsupportedType => "unsupported_type",
            SkipReason::Placeholder => "placeholder",
            SkipReason::Hidden => "hidden",
            SkipReason::Vanished => "vanished",
        };
        f.write_str(s)
    }
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Filed { final_path: PathBuf, category: String },
    Failed { reason: FailureReason, message: String },
    Skipped(SkipReason),
    Interrupted { during: FileState },
}

impl FileOutcome {
    pub fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self::Failed {
            reason,
            message: message.into(),
        }
    }

    pub fn state(&self) -> FileState {
        match self {
            FileOutcome::Filed { .. } => FileState::Filed,
            FileOutcome::Failed { .. } => FileState::Failed,
            FileOutcome::Skipped(_) => FileState::Skipped,
            FileOutcome::Interrupted { .. } => FileState::Interrupted,
        }
    }
}
