//! ReplyPublisher - emits replies and their telemetry

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::{BusClient, publish_json};
use crate::domain::{Reply, TelemetryEvent};

/// Which of the two emissions for a reply went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub reply_published: bool,
    pub telemetry_published: bool,
}

/// Publishes each reply to the reply channel and its cost to the telemetry channel
///
/// The two publishes are independent. A failure of one is logged and does not
/// affect the other; neither is retried here.
#[derive(Clone)]
pub struct ReplyPublisher {
    bus: Arc<dyn BusClient>,
    reply_channel: String,
    telemetry_channel: String,
}

impl ReplyPublisher {
    pub fn new(bus: Arc<dyn BusClient>, reply_channel: impl Into<String>, telemetry_channel: impl Into<String>) -> Self {
        let reply_channel = reply_channel.into();
        let telemetry_channel = telemetry_channel.into();
        debug!(%reply_channel, %telemetry_channel, "ReplyPublisher::new: called");
        Self {
            bus,
            reply_channel,
            telemetry_channel,
        }
    }

    pub async fn publish(&self, reply: &Reply) -> PublishOutcome {
        debug!(message_id = %reply.message_id, success = reply.success, "ReplyPublisher::publish: called");
        let key = reply.message_id.as_str();

        let reply_published = match publish_json(self.bus.as_ref(), &self.reply_channel, reply, Some(key)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(message_id = %key, channel = %self.reply_channel, error = %e, "Failed to publish reply");
                false
            }
        };

        let event = TelemetryEvent::from_reply(reply);
        let telemetry_published =
            match publish_json(self.bus.as_ref(), &self.telemetry_channel, &event, Some(key)).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(message_id = %key, channel = %self.telemetry_channel, error = %e, "Failed to publish telemetry");
                    false
                }
            };

        PublishOutcome {
            reply_published,
            telemetry_published,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, InMemoryBus, Subscription};
    use crate::domain::{CostRecord, RequestId, ResponderType};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Bus that refuses publishes to one channel
    struct FailingChannelBus {
        inner: InMemoryBus,
        failing: String,
    }

    #[async_trait]
    impl BusClient for FailingChannelBus {
        async fn publish(&self, channel: &str, payload: Vec<u8>, key: Option<&str>) -> Result<(), BusError> {
            if channel == self.failing {
                return Err(BusError::Unavailable(format!("{channel} is down")));
            }
            self.inner.publish(channel, payload, key).await
        }

        async fn subscribe(&self, channels: &[String], group_id: &str) -> Result<Box<dyn Subscription>, BusError> {
            self.inner.subscribe(channels, group_id).await
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn sample_reply() -> Reply {
        Reply::success(
            RequestId::generate(),
            ResponderType::EnglishTeacher,
            "answer",
            CostRecord::new(10, 20, 0.005, "m"),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_publish_both_channels() {
        let bus = InMemoryBus::new();
        let mut replies = bus.subscribe(&["responses".to_string()], "g").await.unwrap();
        let mut telemetry = bus.subscribe(&["cost_monitor".to_string()], "g").await.unwrap();

        let publisher = ReplyPublisher::new(Arc::new(bus.clone()), "responses", "cost_monitor");
        let reply = sample_reply();
        let outcome = publisher.publish(&reply).await;
        assert!(outcome.reply_published && outcome.telemetry_published);

        let got = replies.poll(Duration::from_millis(50)).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key.as_deref(), Some(reply.message_id.as_str()));
        let decoded: Reply = serde_json::from_slice(&got[0].payload).unwrap();
        assert_eq!(decoded, reply);

        let got = telemetry.poll(Duration::from_millis(50)).await.unwrap();
        let event: TelemetryEvent = serde_json::from_slice(&got[0].payload).unwrap();
        assert_eq!(event.agent_type, "english_teacher");
        assert_eq!(event.cost_info.cost_usd, 0.005);
    }

    #[tokio::test]
    async fn test_telemetry_failure_does_not_block_reply() {
        let inner = InMemoryBus::new();
        let mut replies = inner.subscribe(&["responses".to_string()], "g").await.unwrap();
        let bus = FailingChannelBus {
            inner: inner.clone(),
            failing: "cost_monitor".to_string(),
        };

        let publisher = ReplyPublisher::new(Arc::new(bus), "responses", "cost_monitor");
        let outcome = publisher.publish(&sample_reply()).await;
        assert!(outcome.reply_published);
        assert!(!outcome.telemetry_published);
        assert_eq!(replies.poll(Duration::from_millis(50)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_failure_does_not_block_telemetry() {
        let inner = InMemoryBus::new();
        let mut telemetry = inner.subscribe(&["cost_monitor".to_string()], "g").await.unwrap();
        let bus = FailingChannelBus {
            inner: inner.clone(),
            failing: "responses".to_string(),
        };

        let publisher = ReplyPublisher::new(Arc::new(bus), "responses", "cost_monitor");
        let outcome = publisher.publish(&sample_reply()).await;
        assert!(!outcome.reply_published);
        assert!(outcome.telemetry_published);
        assert_eq!(telemetry.poll(Duration::from_millis(50)).await.unwrap().len(), 1);
    }
}
