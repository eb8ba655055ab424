//! Reply listener loop

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::table::Inner;
use crate::bus::Subscription;
use crate::domain::Reply;

/// Poll the reply channel and resolve waiters until shutdown
pub(crate) async fn run(inner: Arc<Inner>, mut subscription: Box<dyn Subscription>) {
    let mut shutdown = inner.shutdown_rx();
    let poll_timeout = inner.config().poll_timeout();
    let backoff = inner.config().error_backoff();
    info!(group_id = %subscription.group_id(), "Reply listener running");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let polled = tokio::select! {
            _ = shutdown.changed() => break,
            result = subscription.poll(poll_timeout) => result,
        };

        match polled {
            Ok(batch) => {
                for message in batch {
                    match serde_json::from_slice::<Reply>(&message.payload) {
                        Ok(reply) => {
                            inner.deliver(reply);
                        }
                        Err(e) => {
                            warn!(key = ?message.key, error = %e, "Skipping unreadable reply");
                        }
                    }
                }
            }
            Err(e) => {
                if e.is_transport() {
                    warn!(error = %e, ?backoff, "Reply poll failed, backing off");
                } else {
                    error!(error = %e, ?backoff, "Reply subscription error, backing off");
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    debug!("listener::run: exiting");
    info!("Reply listener stopped");
}
