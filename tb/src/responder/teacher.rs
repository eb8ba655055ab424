//! Language-teacher responder backed by an answer engine

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Responder, ResponderError, build_prompt, system_prompt};
use crate::domain::{CostRecord, Reply, Request, ResponderType};
use crate::llm::LlmClient;

/// Teacher persona over a shared engine
pub struct TeacherResponder {
    responder_type: ResponderType,
    system_prompt: String,
    llm: Arc<dyn LlmClient>,
}

impl TeacherResponder {
    pub fn new(responder_type: ResponderType, llm: Arc<dyn LlmClient>) -> Self {
        debug!(%responder_type, model = %llm.name(), "TeacherResponder::new: called");
        Self {
            responder_type,
            system_prompt: system_prompt(responder_type).to_string(),
            llm,
        }
    }

    /// Replace the persona prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Responder for TeacherResponder {
    fn responder_type(&self) -> ResponderType {
        self.responder_type
    }

    fn model_name(&self) -> &str {
        self.llm.name()
    }

    async fn process(&self, request: &Request) -> Result<Reply, ResponderError> {
        debug!(message_id = %request.message_id, responder = %self.responder_type, "TeacherResponder::process: called");
        let started = Instant::now();
        let prompt = build_prompt(&self.system_prompt, &request.content);

        let reply = match self.llm.generate(&prompt).await {
            Ok(generation) => {
                let cost = self.llm.cost_record(generation.input_tokens, generation.output_tokens);
                Reply::success(
                    request.message_id.clone(),
                    self.responder_type,
                    generation.content,
                    cost,
                    started.elapsed(),
                )
            }
            Err(e) => {
                warn!(
                    message_id = %request.message_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Engine call failed"
                );
                Reply::failure(
                    request.message_id.clone(),
                    self.responder_type,
                    format!("Processing failed: {e}"),
                    CostRecord::zero(self.llm.name()),
                    started.elapsed(),
                )
            }
        };

        info!(
            message_id = %reply.message_id,
            responder = %self.responder_type,
            success = reply.success,
            response_time = %format!("{:.2}s", reply.response_time),
            "Request processed"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Language;
    use crate::llm::Generation;
    use crate::llm::client::mock::MockLlmClient;

    fn generation(content: &str) -> Generation {
        Generation {
            content: content.to_string(),
            input_tokens: 1000,
            output_tokens: 1000,
        }
    }

    #[tokio::test]
    async fn test_process_success() {
        let llm = Arc::new(MockLlmClient::new("mock-model", vec![Ok(generation("天下為公"))]));
        let responder = TeacherResponder::new(ResponderType::ChineseTeacher, llm.clone());
        let request = Request::new("u1", "什么是仁？", Language::Chinese);

        let reply = responder.process(&request).await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.message_id, request.message_id);
        assert_eq!(reply.agent_type, ResponderType::ChineseTeacher);
        assert_eq!(reply.content, "天下為公");
        assert_eq!(reply.cost_info.total_tokens, 2000);
        assert!((reply.cost_info.cost_usd - 3.0).abs() < 1e-9);
        assert_eq!(reply.cost_info.model_name, "mock-model");

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].ends_with("\n\nUser Question: 什么是仁？"));
        assert!(prompts[0].contains("Chinese teacher"));
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_failed_reply() {
        let llm = Arc::new(MockLlmClient::new("mock-model", vec![Err("quota exceeded".to_string())]));
        let responder =
            TeacherResponder::new(ResponderType::EnglishTeacher, llm).with_system_prompt("SYS");
        let request = Request::new("u1", "hello", Language::English);

        let reply = responder.process(&request).await.unwrap();
        assert!(!reply.success);
        assert!(reply.content.starts_with("Processing failed:"));
        assert!(reply.content.contains("quota exceeded"));
        assert_eq!(reply.cost_info.input_tokens, 0);
        assert_eq!(reply.cost_info.output_tokens, 0);
        assert_eq!(reply.cost_info.total_tokens, 0);
        assert_eq!(reply.cost_info.cost_usd, 0.0);
        assert_eq!(reply.cost_info.model_name, "mock-model");
    }

    #[test]
    fn test_model_name_from_engine() {
        let llm = Arc::new(MockLlmClient::new("gemini-1.5-flash", vec![]));
        let responder = TeacherResponder::new(ResponderType::EnglishTeacher, llm);
        assert_eq!(responder.model_name(), "gemini-1.5-flash");
        assert_eq!(responder.responder_type(), ResponderType::EnglishTeacher);
    }
}
