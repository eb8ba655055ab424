//! CorrelationTable - matches replies to waiting callers by request id

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::CorrelationError;
use crate::bus::BusClient;
use crate::config::CorrelationConfig;
use crate::domain::{Reply, RequestId};

/// Stand-in deadline for timeouts too large to add to the clock (30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How a wait for a reply ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// The matching reply arrived; it may itself be a failed reply
    Answered(Reply),
    /// No reply within the deadline
    TimedOut { waited: Duration },
    /// The table shut down while waiting
    Cancelled,
    /// The request never made it onto the bus
    SendFailed { error: String },
}

impl ReplyOutcome {
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            ReplyOutcome::Answered(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, ReplyOutcome::TimedOut { .. })
    }
}

/// Counters describing correlation activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationMetrics {
    pub pending: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

pub(crate) struct Inner {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>,
    shutdown_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    config: CorrelationConfig,
    delivered: AtomicU64,
    dropped: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: &RequestId) -> bool {
        self.lock().remove(id).is_some()
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Hand a reply to its waiter, or drop it if nobody waits
    pub(crate) fn deliver(&self, reply: Reply) -> bool {
        let sender = self.lock().remove(&reply.message_id);
        let Some(sender) = sender else {
            debug!(message_id = %reply.message_id, "CorrelationTable: no waiter, reply dropped");
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return false;
        };

        let message_id = reply.message_id.clone();
        match sender.send(reply) {
            Ok(()) => {
                debug!(%message_id, "CorrelationTable: reply delivered");
                self.delivered.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(_) => {
                debug!(%message_id, "CorrelationTable: waiter gone, reply dropped");
                self.dropped.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn config(&self) -> &CorrelationConfig {
        &self.config
    }
}

/// Table of callers waiting for replies
///
/// Cheap to clone; all clones share one table. Every pending entry is
/// resolved exactly once: by the listener delivering the reply, by the
/// caller's deadline, or by shutdown.
#[derive(Clone)]
pub struct CorrelationTable {
    inner: Arc<Inner>,
}

impl CorrelationTable {
    pub fn new(config: CorrelationConfig) -> Self {
        debug!(?config, "CorrelationTable::new: called");
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                shutdown_tx,
                listener: Mutex::new(None),
                config,
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
            }),
        }
    }

    /// Default deadline for `await_reply` callers that don't pass one
    pub fn default_timeout(&self) -> Duration {
        self.inner.config.default_timeout()
    }

    /// Create the pending entry for a request id
    ///
    /// Register before publishing the request so a fast reply cannot be missed.
    pub fn register(&self, id: RequestId) -> Result<PendingReply, CorrelationError> {
        debug!(message_id = %id, "CorrelationTable::register: called");
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.lock();
            if pending.contains_key(&id) {
                return Err(CorrelationError::DuplicateId(id));
            }
            pending.insert(id.clone(), tx);
        }

        Ok(PendingReply {
            inner: self.inner.clone(),
            id,
            rx: Some(rx),
            armed: true,
        })
    }

    /// Register and wait in one step
    pub async fn await_reply(&self, id: RequestId, timeout: Duration) -> Result<ReplyOutcome, CorrelationError> {
        Ok(self.register(id)?.wait(timeout).await)
    }

    /// Resolve the waiter for a reply; returns false when the reply was dropped
    pub fn on_reply_received(&self, reply: Reply) -> bool {
        self.inner.deliver(reply)
    }

    /// Subscribe to the reply channel and spawn the listener
    pub async fn start(&self, bus: Arc<dyn BusClient>, reply_channel: &str) -> Result<(), CorrelationError> {
        debug!(%reply_channel, "CorrelationTable::start: called");
        if self.inner.is_shut_down() {
            return Err(CorrelationError::ShutDown);
        }

        if self.listener_running() {
            return Err(CorrelationError::AlreadyStarted);
        }

        let channels = vec![reply_channel.to_string()];
        let subscription = bus.subscribe(&channels, &self.inner.config.group_id).await?;
        let handle = tokio::spawn(super::listener::run(self.inner.clone(), subscription));

        *self.inner.listener.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        info!(%reply_channel, group_id = %self.inner.config.group_id, "Correlation listener started");
        Ok(())
    }

    /// Cancel every waiter and stop the listener
    pub async fn stop(&self) {
        debug!("CorrelationTable::stop: called");
        self.inner.shutdown_tx.send_replace(true);

        // Dropping the senders wakes every waiter immediately
        let abandoned = {
            let mut pending = self.inner.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            info!(abandoned, "Cancelled pending replies on shutdown");
        }

        let handle = self.inner.listener.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(mut handle) = handle {
            let grace = self.inner.config.shutdown_grace();
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(?grace, "Correlation listener did not stop in time, aborting");
                handle.abort();
            }
        }
        info!("Correlation table stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Whether the reply listener task is alive
    pub fn listener_running(&self) -> bool {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn metrics(&self) -> CorrelationMetrics {
        CorrelationMetrics {
            pending: self.pending_count(),
            delivered: self.inner.delivered.load(Ordering::SeqCst),
            dropped: self.inner.dropped.load(Ordering::SeqCst),
            timed_out: self.inner.timed_out.load(Ordering::SeqCst),
            cancelled: self.inner.cancelled.load(Ordering::SeqCst),
        }
    }
}

/// One caller's claim on a future reply
///
/// Dropping it without waiting removes the entry, so a late reply is dropped
/// rather than leaked.
pub struct PendingReply {
    inner: Arc<Inner>,
    id: RequestId,
    rx: Option<oneshot::Receiver<Reply>>,
    armed: bool,
}

impl PendingReply {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the reply, the deadline, or shutdown, whichever comes first
    ///
    /// Shutdown is checked at least once per check interval.
    pub async fn wait(mut self, timeout: Duration) -> ReplyOutcome {
        debug!(message_id = %self.id, ?timeout, "PendingReply::wait: called");
        let Some(mut rx) = self.rx.take() else {
            return ReplyOutcome::Cancelled;
        };
        let check_interval = self.inner.config.check_interval();
        let deadline = deadline_after(timeout);

        loop {
            if self.inner.is_shut_down() {
                return self.cancel();
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let step = check_interval.min(deadline - now);

            match tokio::time::timeout(step, &mut rx).await {
                Ok(Ok(reply)) => {
                    self.armed = false;
                    return ReplyOutcome::Answered(reply);
                }
                // Sender dropped without a reply: the table was cleared
                Ok(Err(_)) => return self.cancel(),
                Err(_) => continue,
            }
        }

        self.armed = false;
        if !self.inner.remove(&self.id) {
            // The listener won the race for the entry; its reply is in the channel
            if let Ok(reply) = rx.try_recv() {
                return ReplyOutcome::Answered(reply);
            }
        }

        self.inner.timed_out.fetch_add(1, Ordering::SeqCst);
        info!(message_id = %self.id, ?timeout, "Timed out waiting for reply");
        ReplyOutcome::TimedOut { waited: timeout }
    }

    fn cancel(&mut self) -> ReplyOutcome {
        self.armed = false;
        self.inner.remove(&self.id);
        self.inner.cancelled.fetch_add(1, Ordering::SeqCst);
        debug!(message_id = %self.id, "PendingReply: cancelled by shutdown");
        ReplyOutcome::Cancelled
    }
}

/// `now + timeout`, capped far in the future instead of overflowing
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.armed {
            self.inner.remove(&self.id);
        }
    }
}
