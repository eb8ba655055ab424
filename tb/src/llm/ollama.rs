//! Ollama API client implementation
//!
//! Non-streaming calls to a local Ollama server's `/api/generate` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Generation, LlmClient, LlmError, Pricing, estimate_tokens};
use crate::config::OllamaConfig;

/// Timeout for the availability check
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

/// Parse a `/api/generate` body, estimating tokens the server did not report
fn parse_generate_response(body: &str, prompt: &str) -> Result<Generation, LlmError> {
    let parsed: GenerateResponse = serde_json::from_str(body)?;
    let input_tokens = parsed.prompt_eval_count.unwrap_or_else(|| estimate_tokens(prompt));
    let output_tokens = parsed.eval_count.unwrap_or_else(|| estimate_tokens(&parsed.response));
    Ok(Generation {
        content: parsed.response,
        input_tokens,
        output_tokens,
    })
}

/// Ollama API client
pub struct OllamaClient {
    model: String,
    base_url: String,
    http: Client,
    pricing: Pricing,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a new client from configuration
    pub fn from_config(config: &OllamaConfig, timeout: Duration) -> Result<Self, LlmError> {
        debug!(?config, ?timeout, "OllamaClient::from_config: called");
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            pricing: Pricing::new(config.input_cost_per_1k, config.output_cost_per_1k),
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Network(e)
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }

    async fn is_available(&self) -> bool {
        debug!(base_url = %self.base_url, "OllamaClient::is_available: called");
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                debug!(status = %response.status(), ok, "OllamaClient::is_available: checked");
                ok
            }
            Err(e) => {
                debug!(error = %e, "OllamaClient::is_available: check failed");
                false
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, LlmError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "OllamaClient::generate: called");
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "OllamaClient::generate: API error");
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }

        let generation = parse_generate_response(&text, prompt)?;
        info!(
            input_tokens = generation.input_tokens,
            output_tokens = generation.output_tokens,
            "Ollama response generated"
        );
        Ok(generation)
    }
}
