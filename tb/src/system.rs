//! TeachingSystem - wires routing, workers, correlation and cost tracking
//! over one bus

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bus::{BusClient, BusError, publish_json};
use crate::config::Config;
use crate::consumer::{ConsumerError, ConsumerManager, ReplyPublisher};
use crate::correlation::{CorrelationError, CorrelationMetrics, CorrelationTable, ReplyOutcome};
use crate::cost::{AggregateStats, CostAggregator, CostError};
use crate::domain::{Language, Request, RequestId, ResponderType};
use crate::llm::LlmClient;
use crate::responder::{Responder, TeacherResponder};
use crate::router::{Route, Router};

/// User id used when the caller doesn't supply one
pub const DEFAULT_USER: &str = "default_user";

/// Errors from setting up or driving the system
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Message bus is unreachable")]
    BusUnavailable,

    #[error("No responders registered")]
    NoResponders,

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error(transparent)]
    Cost(#[from] CostError),

    #[error("Failed to publish request: {0}")]
    Bus(#[from] BusError),
}

/// Where a sent request went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub request_id: RequestId,
    pub channel: String,
    pub language: Language,
}

/// Health and throughput overview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub bus_connected: bool,
    /// Responder types with a running worker
    pub active_consumers: Vec<String>,
    pub total_messages_processed: u64,
    pub total_cost: f64,
    pub uptime_seconds: f64,
}

/// The assembled request/reply system
pub struct TeachingSystem {
    config: Config,
    bus: Arc<dyn BusClient>,
    router: Router,
    correlation: CorrelationTable,
    consumers: ConsumerManager,
    costs: CostAggregator,
    started_at: Instant,
}

impl TeachingSystem {
    /// Build every component over the given bus; nothing runs until `start`
    pub fn new(config: Config, bus: Arc<dyn BusClient>) -> Self {
        debug!("TeachingSystem::new: called");
        let router = Router::from_config(&config.topics, &config.router);
        let publisher = ReplyPublisher::new(
            bus.clone(),
            config.topics.responses.clone(),
            config.topics.cost_monitor.clone(),
        );

        Self {
            router,
            correlation: CorrelationTable::new(config.correlation.clone()),
            consumers: ConsumerManager::new(bus.clone(), publisher, config.consumer.clone()),
            costs: CostAggregator::new(config.cost.clone()),
            bus,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Register a responder on its type's input channel
    pub fn register_responder(&self, responder: Arc<dyn Responder>) -> Result<(), SystemError> {
        let channel = self.config.topics.for_responder(responder.responder_type()).to_string();
        self.consumers.register(responder, vec![channel])?;
        Ok(())
    }

    /// Register one teacher per responder type over a shared engine
    pub fn register_teachers(&self, llm: Arc<dyn LlmClient>) -> Result<(), SystemError> {
        debug!(model = %llm.name(), "TeachingSystem::register_teachers: called");
        for responder_type in ResponderType::ALL {
            self.register_responder(Arc::new(TeacherResponder::new(responder_type, llm.clone())))?;
        }
        Ok(())
    }

    /// Start the reply listener, every worker and the cost aggregator
    ///
    /// Fails without starting anything if the bus is unreachable or no
    /// responder is registered.
    pub async fn start(&self) -> Result<(), SystemError> {
        info!("Starting teaching system");
        if !self.bus.health_check().await {
            return Err(SystemError::BusUnavailable);
        }
        if self.consumers.is_empty() {
            return Err(SystemError::NoResponders);
        }

        self.correlation.start(self.bus.clone(), &self.config.topics.responses).await?;
        match self.start_pipeline().await {
            Ok(started) => {
                info!(consumers = started, "Teaching system started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Startup failed, stopping what was started");
                self.consumers.stop_all().await;
                self.costs.stop().await;
                self.correlation.stop().await;
                Err(e)
            }
        }
    }

    async fn start_pipeline(&self) -> Result<usize, SystemError> {
        let started = self.consumers.start_all().await?;
        self.costs.start(self.bus.clone(), &self.config.topics.cost_monitor).await?;
        Ok(started)
    }

    /// Classify text without sending it
    pub fn route(&self, text: &str) -> Route {
        self.router.route(text)
    }

    fn prepare(&self, text: &str, user_id: &str) -> (Request, Route) {
        let route = self.router.route(text);
        let request = Request::new(user_id, text, route.language);
        (request, route)
    }

    /// Route and publish a request without waiting for its reply
    pub async fn send(&self, text: &str, user_id: &str) -> Result<SendReceipt, SystemError> {
        let (request, route) = self.prepare(text, user_id);
        debug!(message_id = %request.message_id, channel = %route.channel, "TeachingSystem::send: called");

        publish_json(
            self.bus.as_ref(),
            &route.channel,
            &request,
            Some(request.message_id.as_str()),
        )
        .await?;

        info!(message_id = %request.message_id, channel = %route.channel, language = %route.language, "Request sent");
        Ok(SendReceipt {
            request_id: request.message_id,
            channel: route.channel,
            language: route.language,
        })
    }

    /// Send a request and wait for its reply
    ///
    /// `None` uses the configured default timeout.
    pub async fn ask(&self, text: &str, user_id: &str, timeout: Option<Duration>) -> ReplyOutcome {
        let timeout = timeout.unwrap_or_else(|| self.correlation.default_timeout());
        let (request, route) = self.prepare(text, user_id);
        debug!(message_id = %request.message_id, channel = %route.channel, ?timeout, "TeachingSystem::ask: called");

        // The reply may arrive before publish returns, so register first
        let pending = match self.correlation.register(request.message_id.clone()) {
            Ok(pending) => pending,
            Err(e) => return ReplyOutcome::SendFailed { error: e.to_string() },
        };

        if let Err(e) = publish_json(
            self.bus.as_ref(),
            &route.channel,
            &request,
            Some(request.message_id.as_str()),
        )
        .await
        {
            warn!(message_id = %request.message_id, error = %e, "Failed to send request");
            return ReplyOutcome::SendFailed { error: e.to_string() };
        }

        info!(message_id = %request.message_id, channel = %route.channel, "Request sent, awaiting reply");
        pending.wait(timeout).await
    }

    pub async fn status(&self) -> SystemStatus {
        let stats = self.costs.snapshot();
        SystemStatus {
            bus_connected: self.bus.health_check().await,
            active_consumers: self
                .consumers
                .status()
                .into_iter()
                .filter_map(|(name, running)| running.then_some(name))
                .collect(),
            total_messages_processed: self.consumers.processed_count(),
            total_cost: stats.total_cost,
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Running flag per responder type
    pub fn consumer_status(&self) -> BTreeMap<String, bool> {
        self.consumers.status()
    }

    pub fn cost_stats(&self) -> AggregateStats {
        self.costs.snapshot()
    }

    pub fn reset_costs(&self) {
        self.costs.reset();
    }

    pub fn correlation_metrics(&self) -> CorrelationMetrics {
        self.correlation.metrics()
    }

    /// Stop the responder workers only; callers keep waiting for replies
    pub async fn stop_workers(&self) {
        self.consumers.stop_all().await;
    }

    /// Stop everything: waiters are cancelled, workers and listeners exit
    pub async fn shutdown(&self) {
        info!("Shutting down teaching system");
        self.correlation.stop().await;
        self.consumers.stop_all().await;
        self.costs.stop().await;
        info!("Teaching system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, Subscription};
    use crate::llm::client::mock::MockLlmClient;
    use async_trait::async_trait;

    /// Bus that refuses subscriptions for one consumer group
    struct RefusingGroupBus {
        inner: InMemoryBus,
        refused_group: &'static str,
    }

    #[async_trait]
    impl BusClient for RefusingGroupBus {
        async fn publish(&self, channel: &str, payload: Vec<u8>, key: Option<&str>) -> Result<(), BusError> {
            self.inner.publish(channel, payload, key).await
        }

        async fn subscribe(&self, channels: &[String], group_id: &str) -> Result<Box<dyn Subscription>, BusError> {
            if group_id == self.refused_group {
                return Err(BusError::Unavailable(format!("group {group_id} refused")));
            }
            self.inner.subscribe(channels, group_id).await
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn system_refusing(group: &'static str) -> (InMemoryBus, TeachingSystem) {
        let inner = InMemoryBus::new();
        let bus = Arc::new(RefusingGroupBus {
            inner: inner.clone(),
            refused_group: group,
        });
        let system = TeachingSystem::new(Config::default(), bus);
        system
            .register_teachers(Arc::new(MockLlmClient::new("mock-model", vec![])))
            .unwrap();
        (inner, system)
    }

    #[tokio::test]
    async fn test_failed_worker_start_releases_listener() {
        let (bus, system) = system_refusing("english_teacher_group");

        let err = system.start().await.unwrap_err();
        assert!(matches!(err, SystemError::Consumer(ConsumerError::Bus(_))));

        assert_eq!(bus.members("responses", "cli_response_group"), 0);
        assert_eq!(bus.members("chinese_teacher", "chinese_teacher_group"), 0);
        assert!(system.consumer_status().values().all(|running| !running));
    }

    #[tokio::test]
    async fn test_failed_cost_start_releases_everything() {
        let (bus, system) = system_refusing("cost_monitor_group");

        let err = system.start().await.unwrap_err();
        assert!(matches!(err, SystemError::Cost(CostError::Bus(_))));

        assert_eq!(bus.members("responses", "cli_response_group"), 0);
        assert_eq!(bus.members("chinese_teacher", "chinese_teacher_group"), 0);
        assert_eq!(bus.members("english_teacher", "english_teacher_group"), 0);
        assert!(system.consumer_status().values().all(|running| !running));
    }
}
