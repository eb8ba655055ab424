//! Bus transport errors

use thiserror::Error;

/// Errors raised by a bus client
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription requires at least one channel")]
    NoChannels,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// Transport-level failures are retried by long-lived loops
    pub fn is_transport(&self) -> bool {
        matches!(self, BusError::Unavailable(_))
    }
}
