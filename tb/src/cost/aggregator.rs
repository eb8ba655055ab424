//! CostAggregator - accumulates telemetry from the cost channel

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::CostError;
use super::stats::{Accumulators, AggregateStats};
use crate::bus::{BusClient, Subscription};
use crate::config::CostConfig;
use crate::domain::{CostRecord, TelemetryEvent, UNKNOWN_KEY};

struct Inner {
    stats: Mutex<Accumulators>,
    config: CostConfig,
    listener: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Inner {
    fn stats(&self) -> MutexGuard<'_, Accumulators> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Running totals of reply cost, by responder type and by model
///
/// Cheap to clone; all clones share one set of accumulators. Each recorded
/// event and each reset is a single critical section.
#[derive(Clone)]
pub struct CostAggregator {
    inner: Arc<Inner>,
}

impl CostAggregator {
    pub fn new(config: CostConfig) -> Self {
        debug!(?config, "CostAggregator::new: called");
        Self {
            inner: Arc::new(Inner {
                stats: Mutex::new(Accumulators::default()),
                config,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the telemetry channel and spawn the listener
    pub async fn start(&self, bus: Arc<dyn BusClient>, telemetry_channel: &str) -> Result<(), CostError> {
        debug!(%telemetry_channel, "CostAggregator::start: called");
        if self.is_running() {
            warn!("Cost aggregator already running");
            return Err(CostError::AlreadyStarted);
        }

        let channels = vec![telemetry_channel.to_string()];
        let subscription = bus.subscribe(&channels, &self.inner.config.group_id).await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(listen(self.clone(), subscription, stop_rx));

        *self.inner.listener.lock().unwrap_or_else(|p| p.into_inner()) = Some((stop_tx, handle));
        info!(%telemetry_channel, group_id = %self.inner.config.group_id, "Cost aggregator started");
        Ok(())
    }

    /// Stop the listener; accumulated totals are kept
    pub async fn stop(&self) {
        debug!("CostAggregator::stop: called");
        let listener = self.inner.listener.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some((stop_tx, mut handle)) = listener else {
            return;
        };

        let _ = stop_tx.send(true);
        let grace = self.inner.config.shutdown_grace();
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(?grace, "Cost listener did not stop in time, aborting");
            handle.abort();
        }
        info!("Cost aggregator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|(_, h)| !h.is_finished())
    }

    /// Count one telemetry event
    pub fn record(&self, event: &TelemetryEvent) {
        self.inner.stats().record(event);
        debug!(
            agent = %event.agent_type,
            model = %event.cost_info.model_name,
            cost = %format!("{:.6}", event.cost_info.cost_usd),
            "CostAggregator::record: cost updated"
        );
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.inner.stats().snapshot()
    }

    /// Zero every accumulator at once
    pub fn reset(&self) {
        *self.inner.stats() = Accumulators::default();
        info!("Cost statistics reset");
    }
}

/// Parse a telemetry payload, defaulting whatever is missing or mistyped
///
/// Returns None only when the payload is not a JSON object.
pub fn parse_telemetry(payload: &[u8]) -> Option<TelemetryEvent> {
    if let Ok(event) = serde_json::from_slice::<TelemetryEvent>(payload) {
        return Some(event);
    }

    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    let object = value.as_object()?;
    let text = |v: Option<&serde_json::Value>, default: &str| {
        v.and_then(|v| v.as_str()).unwrap_or(default).to_string()
    };
    let cost_info = object.get("cost_info");
    let field = |name: &str| cost_info.and_then(|c| c.get(name));

    let input_tokens = field("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output_tokens = field("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let cost_usd = field("cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);

    Some(TelemetryEvent {
        message_id: text(object.get("message_id"), ""),
        agent_type: text(object.get("agent_type"), UNKNOWN_KEY),
        cost_info: CostRecord::new(input_tokens, output_tokens, cost_usd, text(field("model_name"), UNKNOWN_KEY)),
        timestamp: chrono::Utc::now(),
    })
}

async fn listen(aggregator: CostAggregator, mut subscription: Box<dyn Subscription>, mut stop_rx: watch::Receiver<bool>) {
    let poll_timeout = aggregator.inner.config.poll_timeout();
    let backoff = aggregator.inner.config.error_backoff();

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let polled = tokio::select! {
            _ = stop_rx.changed() => break,
            result = subscription.poll(poll_timeout) => result,
        };

        match polled {
            Ok(batch) => {
                for message in batch {
                    match parse_telemetry(&message.payload) {
                        Some(event) => aggregator.record(&event),
                        None => warn!(key = ?message.key, "Skipping unreadable telemetry event"),
                    }
                }
            }
            Err(e) => {
                if e.is_transport() {
                    warn!(error = %e, ?backoff, "Telemetry poll failed, backing off");
                } else {
                    error!(error = %e, ?backoff, "Telemetry subscription error, backing off");
                }
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    debug!("listen: cost listener exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, publish_json};
    use std::time::Duration;

    fn fast_config() -> CostConfig {
        CostConfig {
            poll_timeout_ms: 10,
            error_backoff_ms: 10,
            ..Default::default()
        }
    }

    fn event(agent: &str, cost: f64) -> TelemetryEvent {
        TelemetryEvent {
            message_id: "m".to_string(),
            agent_type: agent.to_string(),
            cost_info: CostRecord::new(10, 10, cost, "gemini-1.5-flash"),
            timestamp: chrono::Utc::now(),
        }
    }

    async fn wait_for_messages(aggregator: &CostAggregator, n: u64) {
        for _ in 0..200 {
            if aggregator.snapshot().total_messages >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("aggregator saw {} of {n} events", aggregator.snapshot().total_messages);
    }

    #[test]
    fn test_parse_telemetry_lenient() {
        let event = parse_telemetry(br#"{"agent_type": "chinese_teacher"}"#).unwrap();
        assert_eq!(event.agent_type, "chinese_teacher");
        assert_eq!(event.cost_info.cost_usd, 0.0);
        assert_eq!(event.cost_info.model_name, UNKNOWN_KEY);

        let event = parse_telemetry(br#"{"cost_info": {"cost_usd": "lots", "model_name": "m"}, "message_id": 5}"#).unwrap();
        assert_eq!(event.agent_type, UNKNOWN_KEY);
        assert_eq!(event.message_id, "");
        assert_eq!(event.cost_info.cost_usd, 0.0);
        assert_eq!(event.cost_info.model_name, "m");

        assert!(parse_telemetry(b"not json").is_none());
        assert!(parse_telemetry(b"[1, 2]").is_none());
    }

    #[tokio::test]
    async fn test_listener_accumulates() {
        let bus = InMemoryBus::new();
        let aggregator = CostAggregator::new(fast_config());
        aggregator.start(Arc::new(bus.clone()), "cost_monitor").await.unwrap();
        assert!(aggregator.is_running());

        publish_json(&bus, "cost_monitor", &event("chinese_teacher", 0.005), None).await.unwrap();
        publish_json(&bus, "cost_monitor", &event("english_teacher", 0.007), None).await.unwrap();
        bus.publish("cost_monitor", b"garbage".to_vec(), None).await.unwrap();
        bus.publish("cost_monitor", br#"{"agent_type": "english_teacher"}"#.to_vec(), None).await.unwrap();

        wait_for_messages(&aggregator, 3).await;
        let stats = aggregator.snapshot();
        assert_eq!(stats.total_messages, 3);
        assert!((stats.total_cost - 0.012).abs() < 1e-9);
        assert!((stats.cost_by_agent["chinese_teacher"] - 0.005).abs() < 1e-9);
        assert!((stats.cost_by_agent["english_teacher"] - 0.007).abs() < 1e-9);
        assert!(stats.cost_by_model.contains_key(UNKNOWN_KEY));

        aggregator.stop().await;
        assert!(!aggregator.is_running());
        assert_eq!(bus.members("cost_monitor", "cost_monitor_group"), 0);
        // Totals survive stop
        assert_eq!(aggregator.snapshot().total_messages, 3);
    }

    #[tokio::test]
    async fn test_reset_zeroes_everything() {
        let aggregator = CostAggregator::new(fast_config());
        aggregator.record(&event("chinese_teacher", 0.5));
        aggregator.reset();

        let stats = aggregator.snapshot();
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert!(stats.cost_by_agent.is_empty());
        assert!(stats.cost_by_model.is_empty());
    }

    fn assert_consistent(stats: &AggregateStats, unit_cost: f64) {
        let by_agent: f64 = stats.cost_by_agent.values().sum();
        let by_model: f64 = stats.cost_by_model.values().sum();
        assert_eq!(stats.total_cost, by_agent, "agent buckets split from total: {stats:?}");
        assert_eq!(stats.total_cost, by_model, "model buckets split from total: {stats:?}");
        assert_eq!(stats.total_cost, stats.total_messages as f64 * unit_cost);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reset_is_atomic_under_concurrent_records() {
        // A power of two keeps every partial sum exact
        const COST: f64 = 0.25;
        let aggregator = CostAggregator::new(fast_config());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut writers = Vec::new();
        for i in 0..4 {
            let aggregator = aggregator.clone();
            let stop = stop.clone();
            let agent = if i % 2 == 0 { "chinese_teacher" } else { "english_teacher" };
            writers.push(tokio::spawn(async move {
                while !stop.load(std::sync::atomic::Ordering::SeqCst) {
                    aggregator.record(&event(agent, COST));
                    tokio::task::yield_now().await;
                }
            }));
        }

        for _ in 0..200 {
            aggregator.reset();
            assert_consistent(&aggregator.snapshot(), COST);
            tokio::task::yield_now().await;
        }

        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        for writer in writers {
            writer.await.unwrap();
        }

        aggregator.reset();
        let stats = aggregator.snapshot();
        assert!(stats.is_empty());
        assert_eq!(stats.total_cost, 0.0);
        assert!(stats.cost_by_agent.is_empty());
        assert!(stats.cost_by_model.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_sum_exactly() {
        const COST: f64 = 0.25;
        let aggregator = CostAggregator::new(fast_config());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let aggregator = aggregator.clone();
                let agent = if i % 2 == 0 { "chinese_teacher" } else { "english_teacher" };
                tokio::spawn(async move {
                    for _ in 0..500 {
                        aggregator.record(&event(agent, COST));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let stats = aggregator.snapshot();
        assert_eq!(stats.total_messages, 4000);
        assert_eq!(stats.total_cost, 1000.0);
        assert_eq!(stats.cost_by_agent["chinese_teacher"], 500.0);
        assert_eq!(stats.cost_by_agent["english_teacher"], 500.0);
        assert_consistent(&stats, COST);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let bus: Arc<dyn BusClient> = Arc::new(InMemoryBus::new());
        let aggregator = CostAggregator::new(fast_config());
        aggregator.start(bus.clone(), "cost_monitor").await.unwrap();
        assert!(matches!(
            aggregator.start(bus, "cost_monitor").await,
            Err(CostError::AlreadyStarted)
        ));
        aggregator.stop().await;
    }
}
