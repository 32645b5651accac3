//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct provides a complete isolated environment for testing
//! the ingestion pipeline, including:
//! - Temporary inbox and target directories
//! - A fast-timing `Config` pointing at them
//! - Orchestrator construction with injected fakes

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use walkdir::WalkDir;

use docsorter::analysis::{AnalysisBackend, DocumentAnalyzer};
use docsorter::{Config, Orchestrator, PipelineObserver, TextExtractor};

/// Test harness providing isolated execution environment for integration tests.
pub struct TestHarness {
    /// Temporary directory containing inbox/target/config.
    temp_dir: TempDir,
    /// Watched inbox.
    pub inbox: PathBuf,
    /// Root of the sorted tree.
    pub target: PathBuf,
    /// Config with short delays, tuned for tests.
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let inbox = temp_dir.path().join("Inbox_Scan");
        let target = temp_dir.path().join("Sorted_Documents");

        std::fs::create_dir_all(&inbox).expect("Failed to create inbox");
        std::fs::create_dir_all(&target).expect("Failed to create target");

        let mut config = Config::default_with_paths(&inbox, &target);
        config.stabilization.delay_seconds = 0.05;
        config.stabilization.max_retries = 2;
        config.analysis.backoff_seconds = 0.01;
        config.ocr.max_concurrent = 2;
        config.watcher.poll_interval_ms = 50;
        config.watcher.debounce_ms = 50;
        config.watcher.cooldown_ms = 1000;

        Self {
            temp_dir,
            inbox,
            target,
            config,
        }
    }

    /// Get the base temp directory path.
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file into the inbox.
    pub fn write_inbox(&self, filename: &str, content: &str) -> PathBuf {
        let path = self.inbox.join(filename);
        std::fs::write(&path, content).expect("Failed to write inbox file");
        path
    }

    /// Write a file somewhere below the target root.
    pub fn write_target(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.target.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create target dir");
        }
        std::fs::write(&path, content).expect("Failed to write target file");
        path
    }

    /// Serialize the harness config to a file.
    pub fn write_config(&self, filename: &str) -> PathBuf {
        let path = self.temp_dir.path().join(filename);
        let json = serde_json::to_string_pretty(&self.config).expect("Failed to serialize config");
        std::fs::write(&path, json).expect("Failed to write config file");
        path
    }

    /// Sorted file names left in the inbox.
    pub fn inbox_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.inbox)
            .expect("Failed to list inbox")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Sorted paths of every file below the target root, relative to it,
    /// with `/` separators.
    pub fn target_files(&self) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(&self.target)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(&self.target)
                    .expect("entry below target")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect();
        files.sort();
        files
    }

    pub fn read_target(&self, relative: &str) -> String {
        std::fs::read_to_string(self.target.join(relative)).expect("Failed to read target file")
    }

    pub fn analyzer<B: AnalysisBackend + 'static>(&self, backend: B) -> Arc<DocumentAnalyzer<B>> {
        Arc::new(DocumentAnalyzer::new(
            backend,
            self.config.analysis.model_name.clone(),
            self.config.analysis.service_url.clone(),
            self.config.analysis.content_preview_length,
        ))
    }

    pub fn orchestrator<E, B, O>(
        &self,
        extractor: Arc<E>,
        backend: B,
        observer: Arc<O>,
    ) -> Orchestrator
    where
        E: TextExtractor + 'static,
        B: AnalysisBackend + 'static,
        O: PipelineObserver + 'static,
    {
        Orchestrator::new(&self.config, extractor, self.analyzer(backend), observer)
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
