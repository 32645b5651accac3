//! Analysis adapter: turns extracted text into a category and a filename
//! using an external local language-model service.

pub mod ollama;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::media::MediaType;
use crate::sanitize::{self, MAX_CATEGORY_CHARS, MAX_NAME_CHARS};

pub use ollama::OllamaClient;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConnectionError(pub String);

/// Validated, path-safe analysis outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub category: String,
    pub base_name: String,
}

/// The external classification capability.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn request(
        &self,
        prompt: &str,
        model_name: &str,
        service_url: &str,
    ) -> Result<String, ConnectionError>;

    async fn check_connection(&self, service_url: &str) -> Result<(), ConnectionError>;
}

#[async_trait]
impl<T: AnalysisBackend + ?Sized> AnalysisBackend for std::sync::Arc<T> {
    async fn request(
        &self,
        prompt: &str,
        model_name: &str,
        service_url: &str,
    ) -> Result<String, ConnectionError> {
        (**self).request(prompt, model_name, service_url).await
    }

    async fn check_connection(&self, service_url: &str) -> Result<(), ConnectionError> {
        (**self).check_connection(service_url).await
    }
}

/// Uniform analysis entry point used by the pipeline.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        media: MediaType,
        captured: Option<NaiveDate>,
    ) -> Result<AnalysisResult, AnalysisError>;
}

pub struct DocumentAnalyzer<B> {
    backend: B,
    model_name: String,
    service_url: String,
    preview_length: usize,
}

impl<B: AnalysisBackend> DocumentAnalyzer<B> {
    pub fn new(
        backend: B,
        model_name: impl Into<String>,
        service_url: impl Into<String>,
        preview_length: usize,
    ) -> Self {
        Self {
            backend,
            model_name: model_name.into(),
            service_url: service_url.into(),
            preview_length,
        }
    }

    pub async fn check_connection(&self) -> Result<(), ConnectionError> {
        self.backend.check_connection(&self.service_url).await
    }

    pub fn build_prompt(
        &self,
        text: &str,
        media: MediaType,
        captured: Option<NaiveDate>,
    ) -> String {
        let preview: String = text.chars().take(self.preview_length).collect();
        let date_hint = match captured {
            Some(date) => format!(
                "The file was captured on {}. Use it only if the document itself has no date.",
                date.format("%Y-%m-%d")
            ),
            None => "The capture date is unknown.".to_string(),
        };

        format!(
            "You sort scanned documents into folders.\n\
             Read the document text below and answer with a single JSON object:\n\
             {{\"category\": \"<short folder name in the document's language, e.g. Rechnungen, Versicherung, Steuern>\",\n \
             \"suggestedName\": \"<YYYY-MM-DD>_<Topic>_<Keyword1>_<Keyword2>\"}}\n\
             Use the document date for YYYY-MM-DD. {date_hint}\n\
             Do not include a file extension. Answer with JSON only.\n\n\
             Source format: {media}\n\
             --- DOCUMENT TEXT ---\n\
             {preview}\n\
             --- END ---\n"
        )
    }
}

/// Pulls the outermost `{...}` out of a model reply that may carry code
/// fences or chatter around the JSON.
fn json_object_slice(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn string_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Validates a raw service response and sanitizes both fields.
pub fn parse_response(raw: &str) -> Result<AnalysisResult, AnalysisError> {
    if raw.trim().is_empty() {
        return Err(AnalysisError::MalformedResponse("empty response".to_string()));
    }

    let slice = json_object_slice(raw)
        .ok_or_else(|| AnalysisError::MalformedResponse("no JSON object in response".to_string()))?;

    let value: Value = serde_json::from_str(slice)
        .map_err(|e| AnalysisError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let category = string_field(&value, &["category"])
        .ok_or_else(|| AnalysisError::MalformedResponse("missing 'category'".to_string()))?;
    let name = string_field(&value, &["suggestedName", "suggested_name", "filename"])
        .ok_or_else(|| AnalysisError::MalformedResponse("missing 'suggestedName'".to_string()))?;

    let category = sanitize::path_component(category, MAX_CATEGORY_CHARS).ok_or_else(|| {
        AnalysisError::MalformedResponse(format!(
            "category '{}' is empty after sanitizing",
            category
        ))
    })?;
    let base_name = sanitize::path_component(name, MAX_NAME_CHARS).ok_or_else(|| {
        AnalysisError::MalformedResponse(format!("name '{}' is empty after sanitizing", name))
    })?;

    Ok(AnalysisResult {
        category,
        base_name,
    })
}

#[async_trait]
impl<B: AnalysisBackend> Analyzer for DocumentAnalyzer<B> {
    async fn analyze(
        &self,
        text: &str,
        media: MediaType,
        captured: Option<NaiveDate>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let prompt = self.build_prompt(text, media, captured);

        let raw = self
            .backend
            .request(&prompt, &self.model_name, &self.service_url)
            .await
            .map_err(|e| AnalysisError::Unreachable(e.0))?;
        debug!(chars = raw.len(), "analysis response received");

        parse_response(&raw).inspect_err(|e| warn!("rejecting analysis response: {}", e))
    }
}
