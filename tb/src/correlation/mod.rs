//! Request/reply correlation over the shared reply channel
//!
//! Callers register a request id before publishing, then wait on it. A single
//! listener task reads the reply channel and hands each reply to the caller
//! waiting on its id; replies nobody waits for are dropped.

use thiserror::Error;

mod listener;
mod table;

pub use table::{CorrelationMetrics, CorrelationTable, PendingReply, ReplyOutcome};

use crate::bus::BusError;
use crate::domain::RequestId;

/// Errors from the correlation table
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("Request id {0} is already awaiting a reply")]
    DuplicateId(RequestId),

    #[error("Reply listener already started")]
    AlreadyStarted,

    #[error("Correlation table has been shut down")]
    ShutDown,

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
