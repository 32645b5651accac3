use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisBackend, ConnectionError};

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for an Ollama-style `/api/generate` endpoint.
pub struct OllamaClient {
    client: Client,
}

impl OllamaClient {
    /// `timeout` bounds a whole generate call, including model load.
    pub fn new(timeout: Duration) -> Result<Self, ConnectionError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// `http://host:11434/api/generate` → `http://host:11434/api/tags`.
fn tags_url(service_url: &str) -> String {
    match service_url.rfind("/api/") {
        Some(pos) => format!("{}/api/tags", &service_url[..pos]),
        None => format!("{}/api/tags", service_url.trim_end_matches('/')),
    }
}

#[async_trait]
impl AnalysisBackend for OllamaClient {
    async fn request(
        &self,
        prompt: &str,
        model_name: &str,
        service_url: &str,
    ) -> Result<String, ConnectionError> {
        let body = GenerateRequest {
            model: model_name,
            prompt,
            stream: false,
            format: "json",
        };

        debug!("POST {} (model {})", service_url, model_name);

        let response = self
            .client
            .post(service_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectionError(format!("Request to {} failed: {}", service_url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ConnectionError(format!(
                "Analysis service returned {}: {}",
                status, text
            )));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ConnectionError(format!("Failed to read response body: {}", e)))?;

        // A missing envelope is left for the analyzer to reject as malformed.
        match serde_json::from_str::<GenerateResponse>(&raw) {
            Ok(envelope) => Ok(envelope.response),
            Err(_) => Ok(raw),
        }
    }

    async fn check_connection(&self, service_url: &str) -> Result<(), ConnectionError> {
        let url = tags_url(service_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectionError(format!("Cannot reach {}: {}", url, e)))?;

        if response.status().is_success() {
            info!("Analysis service reachable at {}", url);
            Ok(())
        } else {
            Err(ConnectionError(format!(
                "Analysis service health check returned {}",
                response.status()
            )))
        }
    }
}
