//! Worker loop - one per registered responder

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::ReplyPublisher;
use crate::bus::{BusMessage, Subscription};
use crate::domain::{CostRecord, Reply, Request, RequestId};
use crate::responder::Responder;

/// Everything a worker task owns
pub(crate) struct Worker {
    pub responder: Arc<dyn Responder>,
    pub subscription: Box<dyn Subscription>,
    pub publisher: ReplyPublisher,
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
    pub stop_rx: watch::Receiver<bool>,
    pub running: Arc<AtomicBool>,
    pub processed: Arc<AtomicU64>,
}

impl Worker {
    /// Poll, process and publish until stopped
    ///
    /// Never returns early on a per-message or transport failure. The
    /// subscription is released when the worker is dropped.
    pub async fn run(mut self) {
        let responder_type = self.responder.responder_type();
        info!(%responder_type, group_id = %self.subscription.group_id(), "Worker started");
        self.running.store(true, Ordering::SeqCst);

        loop {
            if *self.stop_rx.borrow() {
                debug!(%responder_type, "Worker::run: stop flag set");
                break;
            }

            let polled = tokio::select! {
                _ = self.stop_rx.changed() => {
                    debug!(%responder_type, "Worker::run: stop signal received");
                    break;
                }
                result = self.subscription.poll(self.poll_timeout) => result,
            };

            match polled {
                Ok(batch) => {
                    for message in batch {
                        if let Some(reply) = self.handle_message(&message).await {
                            self.publisher.publish(&reply).await;
                            self.processed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
                Err(e) => {
                    if e.is_transport() {
                        warn!(%responder_type, error = %e, backoff = ?self.error_backoff, "Poll failed, backing off");
                    } else {
                        error!(%responder_type, error = %e, backoff = ?self.error_backoff, "Subscription error, backing off");
                    }
                    tokio::select! {
                        _ = self.stop_rx.changed() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(%responder_type, "Worker stopped");
    }

    /// Turn one bus message into exactly one reply where possible
    ///
    /// Returns None only when the payload carries no usable request id.
    async fn handle_message(&self, message: &BusMessage) -> Option<Reply> {
        let started = Instant::now();
        let responder_type = self.responder.responder_type();

        let request: Request = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                return match extract_message_id(&message.payload) {
                    Some(id) => {
                        warn!(message_id = %id, error = %e, "Malformed request, replying with failure");
                        Some(Reply::failure(
                            id,
                            responder_type,
                            format!("Malformed request: {e}"),
                            CostRecord::zero(self.responder.model_name()),
                            started.elapsed(),
                        ))
                    }
                    None => {
                        warn!(channel = %message.channel, error = %e, "Skipping unreadable message with no request id");
                        None
                    }
                };
            }
        };

        debug!(message_id = %request.message_id, %responder_type, "Worker::handle_message: processing");
        let outcome = AssertUnwindSafe(self.responder.process(&request)).catch_unwind().await;

        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(message_id = %request.message_id, error = %e, "Responder failed");
                Reply::failure(
                    request.message_id.clone(),
                    responder_type,
                    format!("System error: {e}"),
                    CostRecord::zero(self.responder.model_name()),
                    started.elapsed(),
                )
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(message_id = %request.message_id, %reason, "Responder panicked");
                Reply::failure(
                    request.message_id.clone(),
                    responder_type,
                    format!("System error: {reason}"),
                    CostRecord::zero(self.responder.model_name()),
                    started.elapsed(),
                )
            }
        };
        Some(reply)
    }
}

/// Best-effort recovery of the request id from an unparseable request
fn extract_message_id(payload: &[u8]) -> Option<RequestId> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value
        .get("message_id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(RequestId::from_string)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "responder panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message_id() {
        let payload = br#"{"message_id": "abc-123", "content": 42}"#;
        assert_eq!(extract_message_id(payload), Some(RequestId::from_string("abc-123")));
        assert_eq!(extract_message_id(br#"{"content": "hi"}"#), None);
        assert_eq!(extract_message_id(br#"{"message_id": ""}"#), None);
        assert_eq!(extract_message_id(b"not json"), None);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "responder panicked");
    }

    #[test]
    fn test_worker_future_is_send() {
        // tokio::spawn needs the whole run loop to be Send
        fn assert_send<T: Send>(_: &T) {}
        fn check(worker: Worker) {
            let run = worker.run();
            assert_send(&run);
        }
        let _ = check;
    }
}
