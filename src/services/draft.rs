use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::models::requests::DraftResponse;
use crate::services::text_gen::preview;

#[derive(Debug, Clone)]
pub struct DraftConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct GenRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct GenResponse {
    text: String,
}

/// Client for the local low-latency draft model service.
///
/// Only loopback endpoints are reachable; anything else is refused before a
/// connection is attempted.
pub struct DraftClient {
    http: Client,
    url: String,
}

impl DraftClient {
    pub fn new(config: &DraftConfig) -> Result<Self, DraftError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()
            .map_err(DraftError::Http)?;
        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }

    /// Ask the draft service for a completion.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, DraftError> {
        let url = ensure_loopback(&self.url)?;

        let response = self
            .http
            .post(url)
            .json(&GenRequest { prompt, max_tokens })
            .send()
            .await
            .map_err(DraftError::Http)?
            .error_for_status()
            .map_err(DraftError::Http)?;

        let body: GenResponse = response.json().await.map_err(DraftError::Http)?;
        Ok(body.text)
    }

    /// Like [`DraftClient::generate`], but never fails: a placeholder carries
    /// the failure reason in `note`.
    pub async fn generate_or_placeholder(&self, prompt: &str, max_tokens: u32) -> DraftResponse {
        match self.generate(prompt, max_tokens).await {
            Ok(text) => DraftResponse { text, note: None },
            Err(e) => {
                tracing::warn!(error = %e, "Draft service unavailable, returning placeholder");
                DraftResponse {
                    text: format!("[MOCK draft] {}...", preview(prompt, 64)),
                    note: Some(e.to_string()),
                }
            }
        }
    }
}

/// Parse `url` and reject hosts other than 127.0.0.1, ::1 or localhost.
pub fn ensure_loopback(url: &str) -> Result<Url, DraftError> {
    let parsed = Url::parse(url).map_err(|_| DraftError::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']');
    let local = host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback());
    if !local || parsed.scheme() != "http" {
        return Err(DraftError::ExternalForbidden(url.to_string()));
    }
    Ok(parsed)
}

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid draft service URL: {0}")]
    InvalidUrl(String),

    #[error("External HTTP is forbidden in offline mode: {0}")]
    ExternalForbidden(String),
}
