//! Responders: turn one Request into one Reply
//!
//! A responder owns no bus state. The consumer pool feeds it requests and
//! publishes whatever it returns.

use async_trait::async_trait;
use thiserror::Error;

mod prompts;
mod teacher;

pub use prompts::{build_prompt, system_prompt};
pub use teacher::TeacherResponder;

use crate::domain::{Reply, Request, ResponderType};

/// Failures a responder could not turn into a reply itself
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("Responder misconfigured: {0}")]
    Misconfigured(String),

    #[error("{0}")]
    Internal(String),
}

/// Produces the answer for one request
#[async_trait]
pub trait Responder: Send + Sync {
    /// Which pool this responder serves
    fn responder_type(&self) -> ResponderType;

    /// Model name charged for this responder's work
    fn model_name(&self) -> &str;

    /// Answer one request
    ///
    /// An `Err` is converted by the worker into a failed reply; it never
    /// stops the worker.
    async fn process(&self, request: &Request) -> Result<Reply, ResponderError>;
}
