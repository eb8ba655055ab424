//! Message bus boundary
//!
//! The rest of the crate only talks to the bus through [`BusClient`] and
//! [`Subscription`]. [`InMemoryBus`] is an in-process broker with
//! channel + consumer-group delivery semantics:
//!
//! ```text
//!   publish("english_teacher")
//!            │
//!            ▼
//!   ┌──────────────────────────────┐
//!   │ channel: english_teacher     │
//!   │   group english_teacher_group│──► worker A ┐ share one queue
//!   │                              │──► worker B ┘
//!   │   group audit_group          │──► auditor    sees every message
//!   └──────────────────────────────┘
//! ```

mod client;
mod error;
mod memory;

pub use client::{BusClient, BusMessage, Subscription, publish_json};
pub use error::BusError;
pub use memory::{DEFAULT_MAX_BATCH, InMemoryBus};
