//! Domain types that travel over the bus
//!
//! - [`Request`]: a user question, routed by language
//! - [`Reply`]: a responder's answer, correlated by request id
//! - [`CostRecord`] / [`TelemetryEvent`]: usage accounting for one reply

mod cost;
mod reply;
mod request;

pub use cost::{CostRecord, TelemetryEvent, UNKNOWN_KEY};
pub use reply::{Reply, ResponderType};
pub use request::{Language, Request, RequestId};
