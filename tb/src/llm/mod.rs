//! Answer-generation engines
//!
//! Stateless prompt-in, text-out clients with token accounting.

use std::sync::Arc;

use tracing::{debug, info, warn};

pub mod client;
mod error;
mod gemini;
mod ollama;
mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use types::{Generation, Pricing, estimate_tokens};

use crate::config::LlmConfig;

/// Engine order to try for a preference
fn engine_order(preferred: &str) -> Result<[&'static str; 2], LlmError> {
    match preferred {
        "auto" | "gemini" => Ok(["gemini", "ollama"]),
        "ollama" => Ok(["ollama", "gemini"]),
        other => Err(LlmError::Unavailable(format!(
            "Unknown preferred engine: '{}'. Supported: auto, gemini, ollama",
            other
        ))),
    }
}

/// Create the client for a named engine without probing it
pub fn create_client(config: &LlmConfig, engine: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(%engine, "create_client: called");
    match engine {
        "gemini" => Ok(Arc::new(GeminiClient::from_config(&config.gemini, config.request_timeout())?)),
        "ollama" => Ok(Arc::new(OllamaClient::from_config(&config.ollama, config.request_timeout())?)),
        other => Err(LlmError::Unavailable(format!("Unknown engine: '{}'", other))),
    }
}

/// Pick the first available engine, preferred one first
///
/// `auto` prefers Gemini. Fails when neither engine is available.
pub async fn select_engine(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(preferred = %config.preferred, "select_engine: called");
    let order = engine_order(&config.preferred)?;

    for (i, engine) in order.iter().enumerate() {
        let client = create_client(config, engine)?;
        if client.is_available().await {
            if i > 0 {
                warn!(preferred = %config.preferred, fallback = %engine, "Preferred engine unavailable, falling back");
            }
            info!(%engine, model = %client.name(), "Selected answer engine");
            return Ok(client);
        }
        debug!(%engine, "select_engine: engine unavailable");
    }

    Err(LlmError::Unavailable(
        "No answer engine available (set GEMINI_API_KEY or start Ollama)".to_string(),
    ))
}
