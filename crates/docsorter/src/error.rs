use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to create target root '{path}': {source}")]
    CreateTargetRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while discovering candidate files. Only `InboxUnavailable`
/// and `WatchFailed` are process-fatal.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Inbox '{path}' is not accessible: {reason}")]
    InboxUnavailable { path: PathBuf, reason: String },

    #[error("Failed to start watching '{path}': {reason}")]
    WatchFailed { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("No usable content in '{0}'")]
    NoContent(PathBuf),

    #[error("Failed to read document '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction backend failed: {0}")]
    Backend(String),
}

impl ExtractionError {
    /// `NoContent` means the document is blank or unreadable; trying again
    /// will not change that.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoContent(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Analysis service unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed analysis response: {0}")]
    MalformedResponse(String),
}

#[derive(Error, Debug)]
pub enum FilingError {
    #[error("No free name for '{base}{extension}' in '{directory}' after {attempts} attempts")]
    ConflictExhausted {
        directory: PathBuf,
        base: String,
        extension: String,
        attempts: u32,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to reserve '{path}': {source}")]
    Reserve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
