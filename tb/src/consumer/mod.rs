//! Responder consumer pools
//!
//! ```text
//!  request channel ──poll──▶ Worker ──process──▶ Responder
//!                               │
//!                               └──▶ ReplyPublisher ──▶ responses
//!                                                   └──▶ cost_monitor
//! ```

use thiserror::Error;

mod manager;
mod publisher;
mod worker;

pub use manager::ConsumerManager;
pub use publisher::{PublishOutcome, ReplyPublisher};

use crate::bus::BusError;
use crate::domain::ResponderType;

/// Errors from registering or starting workers
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Responder {0} is already running")]
    AlreadyRunning(ResponderType),

    #[error("Responder {0} registered with no input channels")]
    NoChannels(ResponderType),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
