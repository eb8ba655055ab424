//! ConsumerManager - owns the responder worker pools
//!
//! One worker per registered responder, each on its own subscription under
//! the responder type's consumer group.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::worker::Worker;
use super::{ConsumerError, ReplyPublisher};
use crate::bus::BusClient;
use crate::config::ConsumerConfig;
use crate::domain::ResponderType;
use crate::responder::Responder;

struct WorkerSlot {
    responder: Arc<dyn Responder>,
    channels: Vec<String>,
    running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    fn is_started(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Registry and lifecycle of responder workers
pub struct ConsumerManager {
    bus: Arc<dyn BusClient>,
    publisher: ReplyPublisher,
    config: ConsumerConfig,
    workers: Mutex<BTreeMap<ResponderType, WorkerSlot>>,
}

impl ConsumerManager {
    pub fn new(bus: Arc<dyn BusClient>, publisher: ReplyPublisher, config: ConsumerConfig) -> Self {
        debug!(?config, "ConsumerManager::new: called");
        Self {
            bus,
            publisher,
            config,
            workers: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ResponderType, WorkerSlot>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a responder on the given input channels
    ///
    /// Replaces a stopped registration of the same type; refuses to replace a
    /// running one.
    pub fn register(&self, responder: Arc<dyn Responder>, channels: Vec<String>) -> Result<(), ConsumerError> {
        let responder_type = responder.responder_type();
        debug!(%responder_type, ?channels, "ConsumerManager::register: called");
        if channels.is_empty() {
            return Err(ConsumerError::NoChannels(responder_type));
        }

        let mut workers = self.lock();
        if let Some(existing) = workers.get(&responder_type) {
            if existing.is_started() {
                return Err(ConsumerError::AlreadyRunning(responder_type));
            }
            warn!(%responder_type, "Replacing stopped responder registration");
        }

        workers.insert(
            responder_type,
            WorkerSlot {
                responder,
                channels,
                running: Arc::new(AtomicBool::new(false)),
                processed: Arc::new(AtomicU64::new(0)),
                stop_tx: None,
                handle: None,
            },
        );
        info!(%responder_type, "Registered responder");
        Ok(())
    }

    /// Number of registered responders
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Subscribe and spawn every registered worker not already running
    ///
    /// A subscription failure aborts the start and is returned; workers
    /// started before the failure keep running.
    pub async fn start_all(&self) -> Result<usize, ConsumerError> {
        debug!("ConsumerManager::start_all: called");
        let pending: Vec<(ResponderType, Vec<String>)> = self
            .lock()
            .iter()
            .filter(|(_, slot)| !slot.is_started())
            .map(|(t, slot)| (*t, slot.channels.clone()))
            .collect();

        let mut started = 0;
        for (responder_type, channels) in pending {
            let group_id = responder_type.group_id();
            let subscription = self.bus.subscribe(&channels, &group_id).await?;

            let mut workers = self.lock();
            let Some(slot) = workers.get_mut(&responder_type) else {
                debug!(%responder_type, "ConsumerManager::start_all: unregistered while subscribing");
                continue;
            };

            let (stop_tx, stop_rx) = watch::channel(false);
            let worker = Worker {
                responder: slot.responder.clone(),
                subscription,
                publisher: self.publisher.clone(),
                poll_timeout: self.config.poll_timeout(),
                error_backoff: self.config.error_backoff(),
                stop_rx,
                running: slot.running.clone(),
                processed: slot.processed.clone(),
            };
            // Marked running before the task is first polled so status is accurate immediately
            slot.running.store(true, Ordering::SeqCst);
            slot.handle = Some(tokio::spawn(worker.run()));
            slot.stop_tx = Some(stop_tx);
            started += 1;
            info!(%responder_type, %group_id, ?channels, "Started consumer");
        }

        Ok(started)
    }

    /// Signal every worker, then wait up to the grace period for each
    ///
    /// Workers still running after the grace period are aborted; their
    /// subscriptions are released either way.
    pub async fn stop_all(&self) {
        debug!("ConsumerManager::stop_all: called");
        let stopping: Vec<(ResponderType, Arc<AtomicBool>, JoinHandle<()>)> = {
            let mut workers = self.lock();
            workers
                .iter_mut()
                .filter_map(|(t, slot)| {
                    if let Some(stop_tx) = slot.stop_tx.take() {
                        let _ = stop_tx.send(true);
                    }
                    slot.handle.take().map(|h| (*t, slot.running.clone(), h))
                })
                .collect()
        };

        let grace = self.config.shutdown_grace();
        for (responder_type, running, mut handle) in stopping {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(_) => debug!(%responder_type, "ConsumerManager::stop_all: worker exited"),
                Err(_) => {
                    warn!(%responder_type, ?grace, "Worker did not stop in time, aborting");
                    handle.abort();
                    running.store(false, Ordering::SeqCst);
                }
            }
        }
        info!("All consumers stopped");
    }

    /// Running flag per responder type
    pub fn status(&self) -> BTreeMap<String, bool> {
        self.lock()
            .iter()
            .map(|(t, slot)| (t.to_string(), slot.running.load(Ordering::SeqCst)))
            .collect()
    }

    /// Number of workers currently running
    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.running.load(Ordering::SeqCst))
            .count()
    }

    /// Replies produced across all workers since registration
    pub fn processed_count(&self) -> u64 {
        self.lock()
            .values()
            .map(|slot| slot.processed.load(Ordering::SeqCst))
            .sum()
    }

    /// Grace period applied by `stop_all`
    pub fn shutdown_grace(&self) -> Duration {
        self.config.shutdown_grace()
    }
}
