//! BusClient and Subscription trait definitions

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::BusError;

/// One message delivered by a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub channel: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Publish/subscribe primitives over named channels
///
/// Implementations must be safe to share across tasks: every publish and
/// subscribe call is individually thread-safe.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Publish a raw payload to a channel, optionally keyed
    async fn publish(&self, channel: &str, payload: Vec<u8>, key: Option<&str>) -> Result<(), BusError>;

    /// Join `group_id` on the given channels
    ///
    /// Members of one group share delivery; different groups each see every
    /// message. Dropping the returned subscription leaves the group.
    async fn subscribe(&self, channels: &[String], group_id: &str) -> Result<Box<dyn Subscription>, BusError>;

    /// Cheap reachability check
    async fn health_check(&self) -> bool;
}

/// A pollable handle on one or more channels under a consumer group
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Wait up to `timeout` for a batch of messages
    ///
    /// Returns an empty batch when nothing arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BusMessage>, BusError>;

    /// Channels this subscription reads from
    fn channels(&self) -> &[String];

    /// Consumer group this subscription belongs to
    fn group_id(&self) -> &str;
}

/// Serialize a value as JSON and publish it
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn BusClient,
    channel: &str,
    value: &T,
    key: Option<&str>,
) -> Result<(), BusError> {
    debug!(%channel, ?key, "publish_json: called");
    let payload = serde_json::to_vec(value)?;
    bus.publish(channel, payload, key).await
}
