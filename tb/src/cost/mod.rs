//! Cost aggregation from the telemetry channel

use thiserror::Error;

mod aggregator;
mod stats;

pub use aggregator::{CostAggregator, parse_telemetry};
pub use stats::AggregateStats;

use crate::bus::BusError;

#[derive(Debug, Error)]
pub enum CostError {
    #[error("Cost aggregator already running")]
    AlreadyStarted,

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
