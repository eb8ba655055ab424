//! In-process broker implementing BusClient

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{BusClient, BusError, BusMessage, Subscription};

/// Maximum messages returned by one poll
pub const DEFAULT_MAX_BATCH: usize = 100;

/// Cap applied when a poll timeout is too large to add to the clock
const MAX_POLL_WAIT: Duration = Duration::from_secs(86400);

/// Queue of undelivered messages for one group on one channel
#[derive(Debug, Default)]
struct GroupQueue {
    queue: VecDeque<BusMessage>,
    members: usize,
}

/// channel -> group -> queue
#[derive(Debug, Default)]
struct BrokerState {
    channels: HashMap<String, HashMap<String, GroupQueue>>,
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    available: AtomicBool,
    published: AtomicU64,
    max_batch: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("in-memory bus is offline".to_string()))
        }
    }
}

/// In-process message broker
///
/// A group's queue outlives its members, so messages published while every
/// worker of a group is stopped wait for the next member. Messages published
/// to a channel nobody has ever subscribed to are discarded.
#[derive(Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

impl InMemoryBus {
    /// Create a bus with the default batch size
    pub fn new() -> Self {
        Self::with_max_batch(DEFAULT_MAX_BATCH)
    }

    /// Create a bus returning at most `max_batch` messages per poll
    pub fn with_max_batch(max_batch: usize) -> Self {
        debug!(max_batch, "InMemoryBus::new: called");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                available: AtomicBool::new(true),
                published: AtomicU64::new(0),
                max_batch: max_batch.max(1),
            }),
        }
    }

    /// Switch the bus on or off; offline publish/subscribe/poll fail with Unavailable
    pub fn set_available(&self, available: bool) {
        info!(available, "InMemoryBus: availability changed");
        self.shared.available.store(available, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Number of messages accepted by publish
    pub fn published_count(&self) -> u64 {
        self.shared.published.load(Ordering::SeqCst)
    }

    /// Number of undelivered messages queued for a group on a channel
    pub fn queued(&self, channel: &str, group_id: &str) -> usize {
        let state = self.shared.lock();
        state
            .channels
            .get(channel)
            .and_then(|groups| groups.get(group_id))
            .map(|g| g.queue.len())
            .unwrap_or(0)
    }

    /// Number of live members in a group on a channel
    pub fn members(&self, channel: &str, group_id: &str) -> usize {
        let state = self.shared.lock();
        state
            .channels
            .get(channel)
            .and_then(|groups| groups.get(group_id))
            .map(|g| g.members)
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>, key: Option<&str>) -> Result<(), BusError> {
        debug!(%channel, ?key, bytes = payload.len(), "InMemoryBus::publish: called");
        self.shared.check_available()?;

        let message = BusMessage {
            channel: channel.to_string(),
            key: key.map(str::to_string),
            payload,
        };

        {
            let mut state = self.shared.lock();
            match state.channels.get_mut(channel) {
                Some(groups) => {
                    for group in groups.values_mut() {
                        group.queue.push_back(message.clone());
                    }
                }
                None => {
                    debug!(%channel, "InMemoryBus::publish: no groups on channel, message discarded");
                }
            }
        }

        self.shared.published.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, channels: &[String], group_id: &str) -> Result<Box<dyn Subscription>, BusError> {
        debug!(?channels, %group_id, "InMemoryBus::subscribe: called");
        self.shared.check_available()?;
        if channels.is_empty() {
            return Err(BusError::NoChannels);
        }

        {
            let mut state = self.shared.lock();
            for channel in channels {
                let group = state
                    .channels
                    .entry(channel.clone())
                    .or_default()
                    .entry(group_id.to_string())
                    .or_default();
                group.members += 1;
            }
        }

        info!(?channels, %group_id, "Subscription created");
        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            channels: channels.to_vec(),
            group_id: group_id.to_string(),
        }))
    }

    async fn health_check(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }
}

/// Subscription on an InMemoryBus; leaves its group when dropped
struct MemorySubscription {
    shared: Arc<Shared>,
    channels: Vec<String>,
    group_id: String,
}

impl MemorySubscription {
    fn drain(&self) -> Vec<BusMessage> {
        let mut state = self.shared.lock();
        let mut batch = Vec::new();
        for channel in &self.channels {
            if let Some(group) = state
                .channels
                .get_mut(channel)
                .and_then(|groups| groups.get_mut(&self.group_id))
            {
                while batch.len() < self.shared.max_batch {
                    match group.queue.pop_front() {
                        Some(message) => batch.push(message),
                        None => break,
                    }
                }
            }
        }
        batch
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BusMessage>, BusError> {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + MAX_POLL_WAIT);

        loop {
            // Register for wake-up before looking so a publish in between is not missed
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.shared.check_available()?;

            let batch = self.drain();
            if !batch.is_empty() {
                debug!(group_id = %self.group_id, count = batch.len(), "MemorySubscription::poll: delivering");
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn channels(&self) -> &[String] {
        &self.channels
    }

    fn group_id(&self) -> &str {
        &self.group_id
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        debug!(group_id = %self.group_id, "MemorySubscription::drop: leaving group");
        let mut state = self.shared.lock();
        for channel in &self.channels {
            if let Some(group) = state
                .channels
                .get_mut(channel)
                .and_then(|groups| groups.get_mut(&self.group_id))
            {
                group.members = group.members.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_publish_then_poll() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();

        bus.publish("topic", b"hello".to_vec(), Some("k1")).await.unwrap();

        let batch = sub.poll(Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"hello");
        assert_eq!(batch[0].key.as_deref(), Some("k1"));
        assert_eq!(batch[0].channel, "topic");
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();

        let start = Instant::now();
        let batch = sub.poll(Duration::from_millis(50)).await.unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("topic", b"late".to_vec(), None).await.unwrap();
        });

        let batch = sub.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_with_unbounded_timeout() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("topic", b"eventually".to_vec(), None).await.unwrap();
        });

        let batch = sub.poll(Duration::MAX).await.unwrap();
        assert_eq!(batch[0].payload, b"eventually".to_vec());
    }

    #[tokio::test]
    async fn test_groups_each_see_every_message() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe(&channels(&["topic"]), "group-a").await.unwrap();
        let mut b = bus.subscribe(&channels(&["topic"]), "group-b").await.unwrap();

        bus.publish("topic", b"m".to_vec(), None).await.unwrap();

        assert_eq!(a.poll(Duration::from_millis(50)).await.unwrap().len(), 1);
        assert_eq!(b.poll(Duration::from_millis(50)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_members_of_one_group_share_delivery() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe(&channels(&["topic"]), "shared").await.unwrap();
        let mut b = bus.subscribe(&channels(&["topic"]), "shared").await.unwrap();

        bus.publish("topic", b"only-once".to_vec(), None).await.unwrap();

        let got_a = a.poll(Duration::from_millis(50)).await.unwrap().len();
        let got_b = b.poll(Duration::from_millis(50)).await.unwrap().len();
        assert_eq!(got_a + got_b, 1);
    }

    #[tokio::test]
    async fn test_queue_survives_members_leaving() {
        let bus = InMemoryBus::new();
        let sub = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();
        assert_eq!(bus.members("topic", "g1"), 1);
        drop(sub);
        assert_eq!(bus.members("topic", "g1"), 0);

        bus.publish("topic", b"waiting".to_vec(), None).await.unwrap();
        assert_eq!(bus.queued("topic", "g1"), 1);

        let mut again = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();
        let batch = again.poll(Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_discarded() {
        let bus = InMemoryBus::new();
        bus.publish("nobody", b"x".to_vec(), None).await.unwrap();
        assert_eq!(bus.published_count(), 1);

        let mut sub = bus.subscribe(&channels(&["nobody"]), "late").await.unwrap();
        assert!(sub.poll(Duration::from_millis(20)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_batch() {
        let bus = InMemoryBus::with_max_batch(2);
        let mut sub = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();
        for i in 0..5u8 {
            bus.publish("topic", vec![i], None).await.unwrap();
        }
        assert_eq!(sub.poll(Duration::from_millis(20)).await.unwrap().len(), 2);
        assert_eq!(bus.queued("topic", "g1"), 3);
    }

    #[tokio::test]
    async fn test_unavailable_bus() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(&channels(&["topic"]), "g1").await.unwrap();

        bus.set_available(false);
        assert!(!bus.health_check().await);
        assert!(bus.publish("topic", vec![], None).await.unwrap_err().is_transport());
        assert!(sub.poll(Duration::from_millis(10)).await.is_err());
        assert!(bus.subscribe(&channels(&["topic"]), "g2").await.is_err());

        bus.set_available(true);
        assert!(bus.health_check().await);
        assert!(sub.poll(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_requires_channels() {
        let bus = InMemoryBus::new();
        let result = bus.subscribe(&[], "g1").await;
        assert!(matches!(result, Err(BusError::NoChannels)));
    }
}
