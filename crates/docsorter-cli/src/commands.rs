use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use docsorter::analysis::{DocumentAnalyzer, OllamaClient};
use docsorter::{
    Config, ContentExtractor, Orchestrator, RunSummary, Shutdown, TesseractBackend,
    TracingObserver, WatchOptions,
};

fn build_analyzer(config: &Config) -> anyhow::Result<DocumentAnalyzer<OllamaClient>> {
    let client = OllamaClient::new(config.analysis.timeout())
        .context("creating analysis service client")?;
    Ok(DocumentAnalyzer::new(
        client,
        config.analysis.model_name.clone(),
        config.analysis.service_url.clone(),
        config.analysis.content_preview_length,
    ))
}

fn build_orchestrator(config: &Config, analyzer: DocumentAnalyzer<OllamaClient>) -> Orchestrator {
    let extractor = ContentExtractor::new(
        TesseractBackend::new(config.ocr.dpi),
        config.ocr.languages.clone(),
        config.ocr.min_content_length,
    );
    Orchestrator::new(
        config,
        Arc::new(extractor),
        Arc::new(analyzer),
        Arc::new(TracingObserver),
    )
}

/// Config validity, directories and service reachability.
async fn verify_prerequisites(
    config: &Config,
    analyzer: &DocumentAnalyzer<OllamaClient>,
) -> anyhow::Result<()> {
    config
        .ensure_directories()
        .context("required directories are not usable")?;
    info!(
        inbox = %config.inbox_path.display(),
        target = %config.target_root.display(),
        "Directories verified"
    );

    analyzer.check_connection().await.with_context(|| {
        format!(
            "cannot reach the analysis service at {}; is `ollama serve` running?",
            config.analysis.service_url
        )
    })?;
    info!(model = %config.analysis.model_name, "Analysis service reachable");
    Ok(())
}

/// Triggers `shutdown` on Ctrl-C / SIGTERM.
fn install_signal_handler(shutdown: &Shutdown) -> anyhow::Result<()> {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        if shutdown.is_triggered() {
            warn!("Shutdown already in progress");
        } else {
            info!("Signal received, finishing in-flight files");
            shutdown.trigger();
        }
    })
    .context("installing signal handler")
}

fn log_summary(summary: &RunSummary) {
    info!(
        filed = summary.filed,
        failed = summary.failed,
        skipped = summary.skipped,
        interrupted = summary.interrupted,
        "Run complete"
    );
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting docsorter v{}", env!("CARGO_PKG_VERSION"));

    let analyzer = build_analyzer(&config)?;
    verify_prerequisites(&config, &analyzer).await?;

    let shutdown = Shutdown::new();
    install_signal_handler(&shutdown)?;

    let orchestrator = build_orchestrator(&config, analyzer);
    let summary = orchestrator
        .run_watching(
            &config.inbox_path,
            WatchOptions::from_config(&config),
            shutdown.listener(),
        )
        .await
        .context("watching the inbox failed")?;

    log_summary(&summary);
    Ok(())
}

pub async fn scan(config: Config, json: bool) -> anyhow::Result<()> {
    let analyzer = build_analyzer(&config)?;
    verify_prerequisites(&config, &analyzer).await?;

    let shutdown = Shutdown::new();
    install_signal_handler(&shutdown)?;

    let orchestrator = build_orchestrator(&config, analyzer);
    let summary = orchestrator
        .run_backlog(&config.inbox_path, shutdown.listener())
        .await
        .context("scanning the inbox failed")?;

    log_summary(&summary);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    if summary.failed > 0 {
        anyhow::bail!("{} file(s) failed", summary.failed);
    }
    Ok(())
}

pub async fn check(config: Config) -> anyhow::Result<()> {
    let analyzer = build_analyzer(&config)?;
    match verify_prerequisites(&config, &analyzer).await {
        Ok(()) => {
            info!("All prerequisites verified");
            println!("ok");
            Ok(())
        }
        Err(e) => {
            error!("Prerequisite check failed: {:#}", e);
            Err(e)
        }
    }
}
