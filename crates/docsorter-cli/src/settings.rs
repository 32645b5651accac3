//! Resolves the effective configuration from file, environment and flags.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use docsorter::{load_config, Config};

/// Values that take precedence over the config file.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Config file (defaults to `<config dir>/docsorter/config.json` if present).
    #[arg(short, long, global = true, env = "DOCSORTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory to watch for new scans.
    #[arg(long, global = true, env = "DOCSORTER_INBOX")]
    pub inbox: Option<PathBuf>,

    /// Root of the sorted document tree.
    #[arg(long, global = true, env = "DOCSORTER_TARGET")]
    pub target: Option<PathBuf>,

    /// Model used for classification.
    #[arg(long, global = true, env = "DOCSORTER_MODEL")]
    pub model: Option<String>,

    /// Analysis service generate endpoint.
    #[arg(long, global = true, env = "DOCSORTER_SERVICE_URL")]
    pub service_url: Option<String>,

    /// Tesseract language list, e.g. `deu+eng`.
    #[arg(long, global = true, env = "DOCSORTER_OCR_LANGUAGES")]
    pub ocr_languages: Option<String>,

    /// Log level or filter directive.
    #[arg(long, global = true, env = "DOCSORTER_LOG")]
    pub log: Option<String>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("docsorter").join("config.json"))
}

/// `~/Documents/Inbox_Scan` and `~/Documents/Sorted_Documents`.
fn default_directories() -> Option<(PathBuf, PathBuf)> {
    let home = dirs::home_dir()?;
    let documents = dirs::document_dir().unwrap_or_else(|| home.join("Documents"));
    Some((
        documents.join("Inbox_Scan"),
        documents.join("Sorted_Documents"),
    ))
}

pub fn resolve(overrides: &Overrides) -> anyhow::Result<Config> {
    let file = overrides
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.is_file()));

    let mut config = match file {
        Some(path) => load_config(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let (inbox, target) =
                default_directories().context("could not determine the home directory")?;
            Config::default_with_paths(inbox, target)
        }
    };

    apply(&mut config, overrides);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn apply(config: &mut Config, overrides: &Overrides) {
    if let Some(inbox) = &overrides.inbox {
        config.inbox_path = inbox.clone();
    }
    if let Some(target) = &overrides.target {
        config.target_root = target.clone();
    }
    if let Some(model) = &overrides.model {
        config.analysis.model_name = model.clone();
    }
    if let Some(url) = &overrides.service_url {
        config.analysis.service_url = url.clone();
    }
    if let Some(languages) = &overrides.ocr_languages {
        config.ocr.languages = languages.clone();
    }
    if let Some(level) = &overrides.log {
        config.logging.level = level.clone();
    }
}
