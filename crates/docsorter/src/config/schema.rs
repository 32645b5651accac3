use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    pub inbox_path: PathBuf,
    pub target_root: PathBuf,
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_placeholder_suffixes")]
    pub placeholder_suffixes: Vec<String>,
    #[serde(default = "default_true")]
    pub ignore_hidden: bool,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub stabilization: StabilizationConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub filing: FilingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_supported_extensions() -> Vec<String> {
    [".pdf", ".jpg", ".jpeg", ".png"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_placeholder_suffixes() -> Vec<String> {
    vec![".icloud".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Tesseract language list, passed through unchanged (e.g. `deu+eng`).
    #[serde(default = "default_ocr_languages")]
    pub languages: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Native PDF text shorter than this (trimmed, in chars) triggers OCR.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
    /// Upper bound on concurrent render/recognize jobs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_ocr_languages() -> String {
    "deu+eng".to_string()
}

fn default_dpi() -> u32 {
    300
}

fn default_min_content_length() -> usize {
    50
}

fn default_max_concurrent() -> usize {
    num_cpus::get()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_ocr_languages(),
            dpi: default_dpi(),
            min_content_length: default_min_content_length(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Total attempts for backend failures. `NoContent` is never retried.
    #[serde(default = "default_extraction_attempts")]
    pub max_attempts: u32,
}

fn default_extraction_attempts() -> u32 {
    2
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_extraction_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationConfig {
    #[serde(default = "default_stabilization_delay")]
    pub delay_seconds: f64,
    #[serde(default = "default_stabilization_retries")]
    pub max_retries: u32,
}

fn default_stabilization_delay() -> f64 {
    2.0
}

fn default_stabilization_retries() -> u32 {
    3
}

impl StabilizationConfig {
    /// Saturates at `Duration::MAX`; `Config::validate` rejects such values.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_seconds).unwrap_or(Duration::MAX)
    }
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_stabilization_delay(),
            max_retries: default_stabilization_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_analysis_timeout")]
    pub timeout_seconds: u64,
    /// Extra attempts after an `Unreachable` failure.
    #[serde(default = "default_unreachable_retries")]
    pub unreachable_retries: u32,
    /// Extra attempts after a `MalformedResponse` failure.
    #[serde(default = "default_malformed_retries")]
    pub malformed_retries: u32,
    /// Base delay between `Unreachable` retries; doubles each attempt.
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: f64,
    /// Characters of extracted text included in the prompt.
    #[serde(default = "default_preview_length")]
    pub content_preview_length: usize,
}

fn default_model_name() -> String {
    "llama3.2".to_string()
}

fn default_service_url() -> String {
    "http://localhost:11434/api/generate".to_string()
}

fn default_analysis_timeout() -> u64 {
    60
}

fn default_unreachable_retries() -> u32 {
    3
}

fn default_malformed_retries() -> u32 {
    1
}

fn default_backoff_seconds() -> f64 {
    2.0
}

fn default_preview_length() -> usize {
    2000
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_seconds).unwrap_or(Duration::MAX)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            service_url: default_service_url(),
            timeout_seconds: default_analysis_timeout(),
            unreachable_retries: default_unreachable_retries(),
            malformed_retries: default_malformed_retries(),
            backoff_seconds: default_backoff_seconds(),
            content_preview_length: default_preview_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// Repeat events for the same path inside this window are dropped.
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_debounce() -> u64 {
    500
}

fn default_cooldown() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            debounce_ms: default_debounce(),
            cooldown_ms: default_cooldown(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingConfig {
    /// Highest disambiguation suffix tried before giving up.
    #[serde(default = "default_max_suffix")]
    pub max_suffix: u32,
}

fn default_max_suffix() -> u32 {
    1000
}

impl Default for FilingConfig {
    fn default() -> Self {
        Self {
            max_suffix: default_max_suffix(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Optional log file; console logging is always on.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// All-defaults configuration for the given inbox and target root.
    pub fn default_with_paths<P: AsRef<Path>, Q: AsRef<Path>>(inbox: P, target: Q) -> Self {
        Self {
            version: default_version(),
            inbox_path: inbox.as_ref().to_path_buf(),
            target_root: target.as_ref().to_path_buf(),
            supported_extensions: default_supported_extensions(),
            placeholder_suffixes: default_placeholder_suffixes(),
            ignore_hidden: true,
            ocr: OcrConfig::default(),
            extraction: ExtractionConfig::default(),
            stabilization: StabilizationConfig::default(),
            analysis: AnalysisConfig::default(),
            watcher: WatcherConfig::default(),
            filing: FilingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != "1.0" {
            return Err(invalid(format!(
                "Unsupported config version: {}",
                self.version
            )));
        }
        if self.inbox_path.as_os_str().is_empty() {
            return Err(invalid("inbox_path must not be empty".to_string()));
        }
        if self.target_root.as_os_str().is_empty() {
            return Err(invalid("target_root must not be empty".to_string()));
        }
        if self.supported_extensions.is_empty() {
            return Err(invalid(
                "supported_extensions must list at least one extension".to_string(),
            ));
        }
        for ext in &self.supported_extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(invalid(format!(
                    "Extension '{}' must start with a dot, e.g. '.pdf'",
                    ext
                )));
            }
        }
        let delay = self.stabilization.delay_seconds;
        if !(delay > 0.0 && Duration::try_from_secs_f64(delay).is_ok()) {
            return Err(invalid(format!(
                "stabilization.delay_seconds must be > 0 and representable as a duration (got {})",
                delay
            )));
        }
        let backoff = self.analysis.backoff_seconds;
        if Duration::try_from_secs_f64(backoff).is_err() {
            return Err(invalid(format!(
                "analysis.backoff_seconds must be >= 0 and representable as a duration (got {})",
                backoff
            )));
        }
        if self.extraction.max_attempts == 0 {
            return Err(invalid("extraction.max_attempts must be >= 1".to_string()));
        }
        if self.ocr.max_concurrent == 0 {
            return Err(invalid("ocr.max_concurrent must be >= 1".to_string()));
        }
        if self.watcher.queue_capacity == 0 {
            return Err(invalid("watcher.queue_capacity must be >= 1".to_string()));
        }
        if self.filing.max_suffix < 2 {
            return Err(invalid("filing.max_suffix must be >= 2".to_string()));
        }
        Ok(())
    }

    /// The inbox must already exist and be writable; the target root is
    /// created if absent.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        if !self.inbox_path.is_dir() {
            return Err(invalid(format!(
                "Inbox path is not an existing directory: {}",
                self.inbox_path.display()
            )));
        }
        check_writable(&self.inbox_path).map_err(|e| {
            invalid(format!(
                "Inbox is not writable: {}: {}",
                self.inbox_path.display(),
                e
            ))
        })?;
        std::fs::create_dir_all(&self.target_root).map_err(|e| ConfigError::CreateTargetRoot {
            path: self.target_root.clone(),
            source: e,
        })
    }
}

/// Failed files stay in the inbox and filed ones leave it, so both need
/// write access to the directory.
fn check_writable(dir: &Path) -> std::io::Result<()> {
    let marker = dir.join(format!(".docsorter-write-check-{}", std::process::id()));
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)?;
    std::fs::remove_file(&marker)
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}
