//! Deferred re-publication of failed orders to the retry channel.
//!
//! Each scheduled retry runs as its own task on a [`TaskTracker`], so a
//! long backoff never holds up consumption of the next inbound message.
//! Shutdown closes the tracker and waits for the pending tasks within a
//! bounded window; whatever is still sleeping after that is cancelled.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use orderflow_core::{
    epoch_millis, headers, Channel, Clock, Headers, OrderId, OutboundMessage, Transport,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, warn};

/// A retry waiting to be published.
#[derive(Debug, Clone)]
pub struct ScheduledRetry {
    /// Order being retried; also the message key.
    pub order_id: OrderId,
    /// Original payload, forwarded unchanged.
    pub payload: Bytes,
    /// Headers from the failed message.
    pub headers: Headers,
    /// Attempt number this publication represents.
    pub attempt: u32,
    /// Backoff before publishing.
    pub delay: Duration,
}

impl ScheduledRetry {
    /// Builds the retry-channel message stamped with the attempt number
    /// and the publication time.
    pub fn to_message(&self, published_at_ms: i64) -> OutboundMessage {
        let mut headers = self.headers.clone();
        headers.insert(headers::RETRY_ATTEMPT.to_string(), self.attempt.to_string());
        headers.insert(headers::RETRY_TIMESTAMP.to_string(), published_at_ms.to_string());

        OutboundMessage::new(
            Bytes::copy_from_slice(self.order_id.as_bytes()),
            self.payload.clone(),
            headers,
        )
    }
}

/// Spawns and tracks delayed retry publications.
#[derive(Clone)]
pub struct RetryScheduler {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    tracker: TaskTracker,
    abandon: CancellationToken,
}

impl RetryScheduler {
    /// Creates a scheduler publishing through `transport`.
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self { transport, clock, tracker: TaskTracker::new(), abandon: CancellationToken::new() }
    }

    /// Schedules a retry publication without waiting for it.
    ///
    /// Publish failures are logged and the order is not retried further.
    pub fn schedule(&self, retry: ScheduledRetry) {
        let transport = self.transport.clone();
        let clock = self.clock.clone();
        let abandon = self.abandon.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                () = abandon.cancelled() => {
                    warn!(
                        order_id = %retry.order_id,
                        attempt = retry.attempt,
                        "retry abandoned before publication"
                    );
                    return;
                },
                () = clock.sleep(retry.delay) => {},
            }

            let message = retry.to_message(epoch_millis(clock.as_ref()));
            match transport.publish(Channel::Retry, message).await {
                Ok(()) => debug!(
                    order_id = %retry.order_id,
                    attempt = retry.attempt,
                    "retry published"
                ),
                Err(e) => error!(
                    order_id = %retry.order_id,
                    attempt = retry.attempt,
                    error = %e,
                    "failed to publish retry"
                ),
            }
        });
    }

    /// Retries scheduled but not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting retries and waits up to `timeout` for pending ones.
    ///
    /// Returns the number of retries abandoned when the window elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.tracker.close();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            return 0;
        }

        let abandoned = self.tracker.len();
        self.abandon.cancel();
        self.tracker.wait().await;
        abandoned
    }
}
