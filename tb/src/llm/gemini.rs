//! Gemini API client implementation
//!
//! Calls the `generateContent` REST endpoint with a single user turn.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Generation, LlmClient, LlmError, Pricing, estimate_tokens};
use crate::config::GeminiConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn parse_generate_content(body: &str, prompt: &str) -> Result<Generation, LlmError> {
    let parsed: GenerateContentResponse = serde_json::from_str(body)?;

    let Some(content) = parsed.candidates.into_iter().find_map(|c| c.content) else {
        let reason = parsed
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(LlmError::InvalidResponse(format!("Gemini returned no content: {reason}")));
    };

    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    let usage = parsed.usage_metadata;
    let input_tokens = usage
        .as_ref()
        .and_then(|u| u.prompt_token_count)
        .unwrap_or_else(|| estimate_tokens(prompt));
    let output_tokens = usage
        .as_ref()
        .and_then(|u| u.candidates_token_count)
        .unwrap_or_else(|| estimate_tokens(&text));

    Ok(Generation {
        content: text,
        input_tokens,
        output_tokens,
    })
}

/// Gemini API client
pub struct GeminiClient {
    model: String,
    api_key: Option<String>,
    base_url: String,
    http: Client,
    pricing: Pricing,
    timeout: Duration,
}

impl GeminiClient {
    /// Create a new client; the API key is read from the configured env var
    pub fn from_config(config: &GeminiConfig, timeout: Duration) -> Result<Self, LlmError> {
        debug!(model = %config.model, api_key_env = %config.api_key_env, "GeminiClient::from_config: called");
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key: config.api_key(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            pricing: Pricing::new(config.input_cost_per_1k, config.output_cost_per_1k),
            timeout,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, LlmError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "GeminiClient::generate: called");
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Unavailable("Gemini API key not configured".to_string()))?;

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::Network(e)
                }
            })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "GeminiClient::generate: API error");
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }

        let generation = parse_generate_content(&text, prompt)?;
        info!(
            input_tokens = generation.input_tokens,
            output_tokens = generation.output_tokens,
            "Gemini response generated"
        );
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_content() {
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "student"}], "role": "model"}}],
            "usageMetadata": {"promptTokenCount": 40, "candidatesTokenCount": 12, "totalTokenCount": 52}
        }"#;
        let generation = parse_generate_content(body, "prompt").unwrap();
        assert_eq!(generation.content, "Hello student");
        assert_eq!(generation.input_tokens, 40);
        assert_eq!(generation.output_tokens, 12);
    }

    #[test]
    fn test_parse_without_usage_estimates() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "abcdefgh"}]}}]}"#;
        let generation = parse_generate_content(body, "abcd").unwrap();
        assert_eq!(generation.input_tokens, 2);
        assert_eq!(generation.output_tokens, 3);
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let err = parse_generate_content(body, "p").unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_unavailable_without_key() {
        let config = GeminiConfig {
            api_key_env: "TUTORBUS_TEST_GEMINI_KEY_UNSET".to_string(),
            ..Default::default()
        };
        let client = GeminiClient::from_config(&config, Duration::from_secs(5)).unwrap();
        assert!(!client.is_available().await);
        assert!(matches!(client.generate("hi").await, Err(LlmError::Unavailable(_))));
    }
}
