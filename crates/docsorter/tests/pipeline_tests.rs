//! End-to-end tests for the ingestion pipeline: inbox in, sorted tree out.

mod common;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use docsorter::analysis::ConnectionError;
use docsorter::watcher::WatchOptions;
use docsorter::{
    ExtractionError, FailureReason, FileState, RunSummary, Shutdown, SkipReason, WatchEvent,
};

use common::{answer, wait_until, FakeExtractor, RecordingObserver, ScriptedBackend, TestHarness};

const STROM: &str = "Stadtwerke Musterstadt\nStromrechnung Januar 2026\nRechnungsbetrag 84,20 EUR";

async fn run_backlog(
    harness: &TestHarness,
    extractor: Arc<FakeExtractor>,
    backend: Arc<ScriptedBackend>,
    observer: Arc<RecordingObserver>,
) -> RunSummary {
    let orchestrator = harness.orchestrator(extractor, backend, observer);
    let shutdown = Shutdown::new();
    orchestrator
        .run_backlog(&harness.inbox, shutdown.listener())
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scanned_receipt_is_filed_by_category() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let backend = Arc::new(ScriptedBackend::classify_as(
        "Rechnungen",
        "2026-01-10_Stromrechnung",
    ));
    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        backend.clone(),
        observer.clone(),
    )
    .await;

    assert_eq!(summary.filed, 1);
    assert_eq!(
        harness.target_files(),
        vec!["Rechnungen/2026-01-10_Stromrechnung.pdf"]
    );
    assert_eq!(
        harness.read_target("Rechnungen/2026-01-10_Stromrechnung.pdf"),
        STROM
    );
    assert!(harness.inbox_files().is_empty());

    assert_eq!(
        observer.states_for(&source),
        vec![
            FileState::Detected,
            FileState::Stabilizing,
            FileState::Extracting,
            FileState::Analyzing,
            FileState::Filing,
            FileState::Filed,
        ]
    );
    assert!(backend.prompts()[0].contains("Stromrechnung Januar 2026"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_existing_destination_gets_suffix() {
    let harness = TestHarness::new();
    harness.write_target("Rechnungen/2026-01-10_Stromrechnung.pdf", "already filed");
    harness.write_inbox("scan_001.pdf", STROM);

    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as(
            "Rechnungen",
            "2026-01-10_Stromrechnung",
        )),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(summary.filed, 1);
    assert_eq!(
        harness.target_files(),
        vec![
            "Rechnungen/2026-01-10_Stromrechnung.pdf",
            "Rechnungen/2026-01-10_Stromrechnung_2.pdf",
        ]
    );
    assert_eq!(
        harness.read_target("Rechnungen/2026-01-10_Stromrechnung.pdf"),
        "already filed"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_colliding_names_never_overwrite() {
    let harness = TestHarness::new();
    for i in 1..=5 {
        harness.write_inbox(&format!("scan_{:03}.jpg", i), &format!("Quittung Nummer {}", i));
    }

    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as("Quittungen", "2026-02-01_Quittung")),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(summary.filed, 5);
    let files = harness.target_files();
    assert_eq!(
        files,
        vec![
            "Quittungen/2026-02-01_Quittung.jpg",
            "Quittungen/2026-02-01_Quittung_2.jpg",
            "Quittungen/2026-02-01_Quittung_3.jpg",
            "Quittungen/2026-02-01_Quittung_4.jpg",
            "Quittungen/2026-02-01_Quittung_5.jpg",
        ]
    );
    let contents: HashSet<String> = files.iter().map(|f| harness.read_target(f)).collect();
    assert_eq!(contents.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_category_retried_once_then_failed() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let backend = Arc::new(ScriptedBackend::always(
        r#"{"suggestedName": "2026-01-10_Stromrechnung"}"#,
    ));
    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        backend.clone(),
        observer.clone(),
    )
    .await;

    assert_eq!(summary.failed, 1);
    assert_eq!(backend.calls(), 2);
    assert_eq!(
        observer.failure_for(&source),
        Some(FailureReason::AnalysisMalformed)
    );
    assert!(!observer.states_for(&source).contains(&FileState::Filing));
    assert_eq!(harness.inbox_files(), vec!["scan_001.pdf"]);
    assert!(harness.target_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_then_valid_is_filed() {
    let harness = TestHarness::new();
    harness.write_inbox("brief.png", "Versicherungsschein Hausrat");

    let valid = answer("Versicherung", "2025-11-03_Hausrat_Versicherungsschein");
    let backend = Arc::new(ScriptedBackend::new(move |_, call| {
        if call == 0 {
            Ok("Here is the answer: category Versicherung".to_string())
        } else {
            Ok(valid.clone())
        }
    }));
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        backend.clone(),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(summary.filed, 1);
    assert_eq!(backend.calls(), 2);
    assert_eq!(
        harness.target_files(),
        vec!["Versicherung/2025-11-03_Hausrat_Versicherungsschein.png"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_service_is_retried() {
    let harness = TestHarness::new();
    harness.write_inbox("scan_001.pdf", STROM);

    let backend = Arc::new(ScriptedBackend::unreachable_then(
        2,
        &answer("Rechnungen", "2026-01-10_Stromrechnung"),
    ));
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        backend.clone(),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(summary.filed, 1);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_service_exhausts_retries() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let backend = Arc::new(ScriptedBackend::new(|_, _| {
        Err(ConnectionError("connection refused".to_string()))
    }));
    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        backend.clone(),
        observer.clone(),
    )
    .await;

    assert_eq!(summary.failed, 1);
    // One attempt plus the configured three retries.
    assert_eq!(backend.calls(), 4);
    assert_eq!(
        observer.failure_for(&source),
        Some(FailureReason::AnalysisUnreachable)
    );
    assert_eq!(harness.inbox_files(), vec!["scan_001.pdf"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blank_document_fails_without_retry() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("blank.pdf", "   \n  ");

    let extractor = Arc::new(FakeExtractor::new());
    let backend = Arc::new(ScriptedBackend::classify_as("X", "y"));
    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(&harness, extractor.clone(), backend.clone(), observer.clone()).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(extractor.calls_for(&source), 1);
    assert_eq!(backend.calls(), 0);
    assert_eq!(observer.failure_for(&source), Some(FailureReason::NoContent));
    assert_eq!(harness.inbox_files(), vec!["blank.pdf"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_extraction_error_is_retried() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let extractor = Arc::new(
        FakeExtractor::new().fail_next(
            "scan_001.pdf",
            ExtractionError::Backend("tesseract crashed".into()),
        ),
    );
    let summary = run_backlog(
        &harness,
        extractor.clone(),
        Arc::new(ScriptedBackend::classify_as("Rechnungen", "2026-01-10_Strom")),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(summary.filed, 1);
    assert_eq!(extractor.calls_for(&source), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persistent_extraction_error_fails() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let extractor = Arc::new(
        FakeExtractor::new()
            .fail_next("scan_001.pdf", ExtractionError::Backend("pdftoppm missing".into()))
            .fail_next("scan_001.pdf", ExtractionError::Backend("pdftoppm missing".into())),
    );
    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(
        &harness,
        extractor.clone(),
        Arc::new(ScriptedBackend::classify_as("Rechnungen", "2026-01-10_Strom")),
        observer.clone(),
    )
    .await;

    assert_eq!(summary.failed, 1);
    assert_eq!(extractor.calls_for(&source), 2);
    assert_eq!(
        observer.failure_for(&source),
        Some(FailureReason::ExtractionFailed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conflict_exhaustion_leaves_source_in_inbox() {
    let mut harness = TestHarness::new();
    harness.config.filing.max_suffix = 2;
    harness.write_target("Rechnungen/doc.pdf", "1");
    harness.write_target("Rechnungen/doc_2.pdf", "2");
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as("Rechnungen", "doc")),
        observer.clone(),
    )
    .await;

    assert_eq!(summary.failed, 1);
    assert_eq!(
        observer.failure_for(&source),
        Some(FailureReason::FilingConflictExhausted)
    );
    assert_eq!(harness.inbox_files(), vec!["scan_001.pdf"]);
    assert_eq!(harness.target_files().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unwritable_target_fails_and_leaves_source() {
    let harness = TestHarness::new();
    // A regular file where the category directory should go.
    harness.write_target("Rechnungen", "not a directory");
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as(
            "Rechnungen",
            "2026-01-10_Stromrechnung",
        )),
        observer.clone(),
    )
    .await;

    assert_eq!(summary.failed, 1);
    assert_eq!(
        observer.failure_for(&source),
        Some(FailureReason::FilingIoError)
    );
    assert_eq!(
        observer.states_for(&source).last(),
        Some(&FileState::Failed)
    );
    assert!(observer.states_for(&source).contains(&FileState::Filing));
    assert_eq!(harness.inbox_files(), vec!["scan_001.pdf"]);
    assert_eq!(harness.read_target("Rechnungen"), "not a directory");
    assert_eq!(harness.target_files(), vec!["Rechnungen"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_long_multibyte_name_is_filed() {
    let harness = TestHarness::new();
    harness.write_inbox("scan_001.pdf", STROM);
    harness.write_inbox("scan_002.pdf", "Stromrechnung Februar 2026");

    let long_name = format!("2026-01-10_{}", "電気料金請求書".repeat(30));
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as("電気料金", &long_name)),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(summary.filed, 2);
    assert!(harness.inbox_files().is_empty());

    let files = harness.target_files();
    assert_eq!(files.len(), 2);
    for file in &files {
        let name = file.rsplit('/').next().unwrap();
        assert!(name.starts_with("2026-01-10_電気料金請求書"));
        assert!(name.len() <= 255);
    }
    assert!(files.iter().any(|f| f.ends_with("_2.pdf")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_growing_file_fails_unstable() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("scan_big.pdf", "start");

    let writing = Arc::new(AtomicBool::new(true));
    let writer = {
        let writing = Arc::clone(&writing);
        let path = source.clone();
        std::thread::spawn(move || {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            while writing.load(Ordering::SeqCst) {
                file.write_all(b"more page data\n").unwrap();
                file.flush().unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let observer = Arc::new(RecordingObserver::new());
    let summary = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as("Rechnungen", "never")),
        observer.clone(),
    )
    .await;

    writing.store(false, Ordering::SeqCst);
    writer.join().unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        observer.failure_for(&source),
        Some(FailureReason::UnstableTimeout)
    );
    assert!(!observer.states_for(&source).contains(&FileState::Filed));
    assert_eq!(harness.inbox_files(), vec!["scan_big.pdf"]);
    assert!(harness.target_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_candidates_are_skipped() {
    let harness = TestHarness::new();
    let notes = harness.write_inbox("notes.txt", "shopping list");
    let placeholder = harness.write_inbox(".scan_002.pdf.icloud", "");
    let hidden = harness.write_inbox(".DS_Store", "");

    let observer = Arc::new(RecordingObserver::new());
    let orchestrator = harness.orchestrator(
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as("X", "y")),
        observer.clone(),
    );

    let (tx, rx) = mpsc::channel(8);
    for path in [&notes, &placeholder, &hidden] {
        tx.send(WatchEvent::live(path.clone())).await.unwrap();
    }
    drop(tx);

    let summary = orchestrator.run(rx, Shutdown::new().listener()).await;

    assert_eq!(summary.skipped, 3);
    assert_eq!(observer.skip_for(&notes), Some(SkipReason::UnsupportedType));
    assert_eq!(observer.skip_for(&placeholder), Some(SkipReason::Placeholder));
    assert_eq!(observer.skip_for(&hidden), Some(SkipReason::Hidden));
    assert_eq!(harness.inbox_files().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_vanished_before_stable_is_skipped() {
    let mut harness = TestHarness::new();
    harness.config.stabilization.delay_seconds = 0.3;
    let source = harness.write_inbox("scan_tmp.pdf", STROM);

    let observer = Arc::new(RecordingObserver::new());
    let orchestrator = Arc::new(harness.orchestrator(
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as("X", "y")),
        observer.clone(),
    ));

    let (tx, rx) = mpsc::channel(8);
    tx.send(WatchEvent::live(source.clone())).await.unwrap();
    drop(tx);

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(rx, Shutdown::new().listener()).await })
    };

    let tracked = orchestrator.tracked();
    assert!(wait_until(Duration::from_secs(2), || tracked.len() == 1).await);
    std::fs::remove_file(&source).unwrap();

    let summary = run.await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(observer.skip_for(&source), Some(SkipReason::Vanished));
    assert!(tracked.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redetected_path_is_not_processed_twice() {
    let harness = TestHarness::new();
    let source = harness.write_inbox("scan_001.pdf", STROM);

    let extractor = Arc::new(FakeExtractor::new().with_delay(Duration::from_millis(300)));
    let observer = Arc::new(RecordingObserver::new());
    let orchestrator = Arc::new(harness.orchestrator(
        extractor.clone(),
        Arc::new(ScriptedBackend::classify_as("Rechnungen", "2026-01-10_Strom")),
        observer.clone(),
    ));
    let tracked = orchestrator.tracked();

    let (tx, rx) = mpsc::channel(8);
    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(rx, Shutdown::new().listener()).await })
    };

    tx.send(WatchEvent::backlog(source.clone())).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || tracked.len() == 1).await);
    let in_flight = tracked.get(&source).unwrap();
    assert!(!in_flight.state.is_terminal());

    // The same path shows up again while still being processed.
    tx.send(WatchEvent::live(source.clone())).await.unwrap();
    tx.send(WatchEvent::live(source.clone())).await.unwrap();
    drop(tx);

    let summary = run.await.unwrap();
    assert_eq!(summary.total(), 1);
    assert_eq!(summary.filed, 1);
    assert_eq!(extractor.calls_for(&source), 1);
    assert_eq!(observer.count_detected(&source), 1);
    assert_eq!(harness.target_files(), vec!["Rechnungen/2026-01-10_Strom.pdf"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_extraction_concurrency_is_bounded() {
    let mut harness = TestHarness::new();
    harness.config.ocr.max_concurrent = 1;
    for i in 1..=3 {
        harness.write_inbox(&format!("scan_{}.pdf", i), &format!("Dokument {}", i));
    }

    let extractor = Arc::new(FakeExtractor::new().with_delay(Duration::from_millis(50)));
    let summary = run_backlog(
        &harness,
        extractor.clone(),
        Arc::new(ScriptedBackend::classify_as("Sonstiges", "2026-01-01_Dokument")),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(summary.filed, 3);
    assert_eq!(extractor.max_active(), 1);
}

fn keyed_backend() -> ScriptedBackend {
    ScriptedBackend::new(|prompt, _| {
        let key = ["alpha", "beta", "gamma"]
            .into_iter()
            .find(|k| prompt.contains(k))
            .unwrap_or("unknown");
        Ok(answer("Rechnungen", &format!("2026-01-10_Rechnung_{}", key)))
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_after_shutdown_completes_backlog_without_duplicates() {
    let mut harness = TestHarness::new();
    harness.config.ocr.max_concurrent = 1;
    for key in ["alpha", "beta", "gamma"] {
        harness.write_inbox(&format!("scan_{}.pdf", key), &format!("Rechnung {}", key));
    }

    // First run: stop as soon as one file has been filed.
    let shutdown = Shutdown::new();
    let observer = Arc::new(RecordingObserver::stopping_after_filed(1, shutdown.clone()));
    let extractor = Arc::new(FakeExtractor::new().with_delay(Duration::from_millis(100)));
    let first = harness
        .orchestrator(extractor, Arc::new(keyed_backend()), observer)
        .run_backlog(&harness.inbox, shutdown.listener())
        .await
        .unwrap();

    assert!(first.filed >= 1);
    assert_eq!(first.filed + first.interrupted, 3);
    assert_eq!(harness.inbox_files().len(), 3 - first.filed);

    // Second run picks up whatever is left.
    let second = run_backlog(
        &harness,
        Arc::new(FakeExtractor::new()),
        Arc::new(keyed_backend()),
        Arc::new(RecordingObserver::new()),
    )
    .await;

    assert_eq!(second.filed, 3 - first.filed);
    assert!(harness.inbox_files().is_empty());
    assert_eq!(
        harness.target_files(),
        vec![
            "Rechnungen/2026-01-10_Rechnung_alpha.pdf",
            "Rechnungen/2026-01-10_Rechnung_beta.pdf",
            "Rechnungen/2026-01-10_Rechnung_gamma.pdf",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_watch_files_new_document() {
    let harness = TestHarness::new();
    let observer = Arc::new(RecordingObserver::new());
    let orchestrator = harness.orchestrator(
        Arc::new(FakeExtractor::new()),
        Arc::new(ScriptedBackend::classify_as("Rechnungen", "2026-01-10_Stromrechnung")),
        observer.clone(),
    );

    let shutdown = Shutdown::new();
    let inbox: PathBuf = harness.inbox.clone();
    let options = WatchOptions::from_config(&harness.config);
    let listener = shutdown.listener();
    let run = tokio::spawn(async move {
        orchestrator
            .run_watching(&inbox, options, listener)
            .await
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    harness.write_inbox("scan_001.pdf", STROM);

    let filed = wait_until(Duration::from_secs(10), || harness.target_files().len() == 1).await;
    shutdown.trigger();
    let summary = run.await.unwrap().unwrap();

    assert!(filed, "document was not filed in time");
    assert_eq!(summary.filed, 1);
    assert_eq!(
        harness.target_files(),
        vec!["Rechnungen/2026-01-10_Stromrechnung.pdf"]
    );
}
