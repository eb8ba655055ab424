//! TutorBus - language-routed teaching assistants over a message bus
//!
//! Questions are classified by language and published to a per-language
//! channel. A pool of workers answers them with an LLM engine and publishes
//! replies plus cost telemetry. The caller correlates replies back to the
//! waiting request by message id, and a cost aggregator keeps running totals.
//!
//! # Modules
//!
//! - [`domain`] - Request, reply and cost records shared over the bus
//! - [`bus`] - Message bus client trait and the in-process bus
//! - [`router`] - Language detection and channel selection
//! - [`llm`] - Answer engines (Gemini, Ollama)
//! - [`responder`] - Teacher personas that turn requests into replies
//! - [`consumer`] - Worker pool and reply publisher
//! - [`correlation`] - Pending-reply table and reply listener
//! - [`cost`] - Cost telemetry aggregation
//! - [`system`] - Wires all of the above together
//! - [`config`] - Configuration types and loading
//! - [`console`] - Interactive console and text rendering
//! - [`cli`] - Command-line interface

pub mod bus;
pub mod cli;
pub mod config;
pub mod console;
pub mod consumer;
pub mod correlation;
pub mod cost;
pub mod domain;
pub mod llm;
pub mod responder;
pub mod router;
pub mod system;

pub use config::Config;
pub use system::{SendReceipt, SystemError, SystemStatus, TeachingSystem};
