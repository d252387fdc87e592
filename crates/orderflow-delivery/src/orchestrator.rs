//! Delivery orchestrator: consumes orders and routes each one to success,
//! retry or the dead-letter channel.
//!
//! Every inbound message walks the same path:
//!
//! 1. Decode. Undecodable bytes are logged and dropped; without a trusted
//!    order ID there is no ledger key to retry against.
//! 2. Process through the injected [`FailurePredicate`].
//! 3. On success, fold the price into the aggregate and clear the ledger.
//! 4. On failure, bump the ledger atomically. Below the cap the original
//!    payload is re-published to the retry channel after an exponential
//!    backoff; at the cap it goes to the dead-letter channel.
//!
//! Messages are handled one at a time, so no two attempts for the same
//! order run concurrently within one orchestrator.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use orderflow_core::{codec, Channel, Clock, InboundMessage, Order, StartPosition, Transport};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    aggregation::{AggregateSnapshot, AggregationReporter, Aggregator},
    dead_letter::DeadLetterEnvelope,
    error::{DeliveryError, ErrorCategory, Result},
    ledger::{FailureDecision, InMemoryRetryLedger, RetryLedger},
    processor::{self, FailurePredicate},
    retry::{RetryDecision, RetryPolicy},
    scheduler::{RetryScheduler, ScheduledRetry},
};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retry cap and backoff.
    pub retry_policy: RetryPolicy,
    /// How long shutdown waits for pending retry publications.
    pub shutdown_timeout: Duration,
    /// Where new subscriptions start reading.
    pub start_position: StartPosition,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
            start_position: StartPosition::Latest,
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Processed; aggregate state after folding in the order.
    Succeeded {
        /// Aggregate after this order
        snapshot: AggregateSnapshot,
    },
    /// Failed; a retry publication has been scheduled.
    RetryScheduled {
        /// Attempt number the retry will carry
        attempt: u32,
        /// Backoff before publication
        delay: Duration,
    },
    /// Failed at the retry cap and routed to the dead-letter channel.
    DeadLettered {
        /// Retries made before giving up
        attempts: u32,
    },
    /// Failed at the retry cap, but the dead-letter publish also failed.
    ///
    /// The ledger entry is already gone, so the order is lost unless the
    /// transport redelivers the inbound message.
    DeadLetterFailed {
        /// Retries made before giving up
        attempts: u32,
        /// Transport error from the dead-letter publish
        reason: String,
    },
    /// Not processable at all.
    Dropped {
        /// Why the message was dropped
        reason: String,
    },
}

/// Counters for orchestrator monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Messages taken off the primary or retry channel.
    pub received: u64,
    /// Orders processed successfully.
    pub succeeded: u64,
    /// Retry publications scheduled.
    pub retries_scheduled: u64,
    /// Orders published to the dead-letter channel.
    pub dead_lettered: u64,
    /// Messages dropped as undecodable.
    pub dropped: u64,
    /// Dead-letter publications that failed.
    pub transport_failures: u64,
}

/// Consumes the primary and retry channels and routes every order.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    predicate: Arc<dyn FailurePredicate>,
    ledger: Arc<dyn RetryLedger>,
    aggregator: Aggregator,
    scheduler: RetryScheduler,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    stats: Arc<RwLock<OrchestratorStats>>,
}

impl Orchestrator {
    /// Creates an orchestrator with a fresh in-memory retry ledger.
    pub fn new(
        transport: Arc<dyn Transport>,
        predicate: Arc<dyn FailurePredicate>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        let scheduler = RetryScheduler::new(transport.clone(), clock.clone());
        Self {
            transport,
            predicate,
            ledger: Arc::new(InMemoryRetryLedger::new()),
            aggregator: Aggregator::new(),
            scheduler,
            clock,
            config,
            stats: Arc::new(RwLock::new(OrchestratorStats::default())),
        }
    }

    /// Replaces the retry ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn RetryLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Read handle over the aggregate state.
    pub fn reporter(&self) -> AggregationReporter {
        self.aggregator.reporter()
    }

    /// The retry ledger in use.
    pub fn ledger(&self) -> &Arc<dyn RetryLedger> {
        &self.ledger
    }

    /// Retry publications scheduled but not yet finished.
    pub fn pending_retries(&self) -> usize {
        self.scheduler.pending()
    }

    /// Current counters.
    pub async fn stats(&self) -> OrchestratorStats {
        *self.stats.read().await
    }

    /// Consumes until `cancel` fires or the subscription ends, then drains
    /// pending retries.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the subscription cannot be opened.
    /// Failures while handling individual messages never end the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut subscription = match self
            .transport
            .subscribe(&Channel::INBOUND, self.config.start_position)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.drain().await;
                return Err(DeliveryError::transport(Channel::Primary, &e));
            },
        };

        info!(
            channels = ?subscription.channels(),
            max_retries = self.config.retry_policy.max_retries,
            "orchestrator consuming"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("orchestrator received shutdown signal");
                    break;
                },
                message = subscription.next() => match message {
                    Some(message) => {
                        self.handle_message(message).await;
                    },
                    None => {
                        warn!("subscription closed, orchestrator stopping");
                        break;
                    },
                },
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Routes a single inbound message.
    pub async fn handle_message(&self, message: InboundMessage) -> DeliveryOutcome {
        self.stats.write().await.received += 1;

        let order = match codec::decode(&message.payload) {
            Ok(order) => order,
            Err(e) => {
                let err = DeliveryError::from(e);
                warn!(
                    channel = %message.channel,
                    offset = message.offset,
                    key = %message.key_lossy(),
                    category = %ErrorCategory::from(&err),
                    error = %err,
                    "dropping undecodable message"
                );
                self.stats.write().await.dropped += 1;
                return DeliveryOutcome::Dropped { reason: err.to_string() };
            },
        };

        match processor::process(self.predicate.as_ref(), &order) {
            Ok(()) => self.on_success(&message, &order).await,
            Err(err) if err.is_retryable() => self.on_failure(&message, order, err).await,
            Err(err) => {
                warn!(
                    order_id = %order.order_id,
                    category = %ErrorCategory::from(&err),
                    error = %err,
                    "dropping order after non-retryable failure"
                );
                self.stats.write().await.dropped += 1;
                DeliveryOutcome::Dropped { reason: err.to_string() }
            },
        }
    }

    async fn on_success(&self, message: &InboundMessage, order: &Order) -> DeliveryOutcome {
        let snapshot = self.aggregator.record_success(order.price).await;
        let cleared = self.ledger.delete(&order.order_id).await;
        self.stats.write().await.succeeded += 1;

        info!(
            order_id = %order.order_id,
            channel = %message.channel,
            product = %order.product,
            price = %order.display_price(),
            previous_attempts = cleared.unwrap_or(0),
            order_count = snapshot.order_count,
            running_average = snapshot.running_average().unwrap_or_default(),
            "order processed"
        );

        DeliveryOutcome::Succeeded { snapshot }
    }

    async fn on_failure(
        &self,
        message: &InboundMessage,
        order: Order,
        err: DeliveryError,
    ) -> DeliveryOutcome {
        let policy = &self.config.retry_policy;

        let attempts = match self.ledger.record_failure(&order.order_id, policy.max_retries).await {
            FailureDecision::Retry { previous_attempts } => match policy.decide(previous_attempts) {
                RetryDecision::Retry { attempt, delay } => {
                    return self.schedule_retry(message, &order, &err, attempt, delay).await;
                },
                RetryDecision::DeadLetter { attempts } => {
                    self.ledger.delete(&order.order_id).await;
                    attempts
                },
            },
            FailureDecision::Exhausted { .. } => policy.max_retries,
        };

        self.dead_letter(message, order, &err, attempts).await
    }

    async fn schedule_retry(
        &self,
        message: &InboundMessage,
        order: &Order,
        err: &DeliveryError,
        attempt: u32,
        delay: Duration,
    ) -> DeliveryOutcome {
        warn!(
            order_id = %order.order_id,
            channel = %message.channel,
            attempt,
            delay_ms = delay.as_millis() as u64,
            category = %ErrorCategory::from(err),
            error = %err,
            "processing failed, retry scheduled"
        );

        self.scheduler.schedule(ScheduledRetry {
            order_id: order.order_id.clone(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            attempt,
            delay,
        });
        self.stats.write().await.retries_scheduled += 1;

        DeliveryOutcome::RetryScheduled { attempt, delay }
    }

    async fn dead_letter(
        &self,
        message: &InboundMessage,
        order: Order,
        err: &DeliveryError,
        attempts: u32,
    ) -> DeliveryOutcome {
        let order_id = order.order_id.clone();
        let envelope = DeadLetterEnvelope {
            order,
            error_message: err.to_string(),
            retry_attempts: attempts,
            dead_lettered_at: DateTime::<Utc>::from(self.clock.now_system()),
        };
        let outbound = envelope.to_message(message.payload.clone(), &message.headers);

        match self.transport.publish(Channel::DeadLetter, outbound).await {
            Ok(()) => {
                self.stats.write().await.dead_lettered += 1;
                error!(
                    order_id = %order_id,
                    channel = %message.channel,
                    attempts,
                    error = %err,
                    "retries exhausted, order dead-lettered"
                );
                DeliveryOutcome::DeadLettered { attempts }
            },
            Err(e) => {
                self.stats.write().await.transport_failures += 1;
                let err = DeliveryError::transport(Channel::DeadLetter, &e);
                error!(
                    order_id = %order_id,
                    attempts,
                    category = %ErrorCategory::from(&err),
                    error = %err,
                    "failed to publish to dead-letter channel, order lost"
                );
                DeliveryOutcome::DeadLetterFailed { attempts, reason: err.to_string() }
            },
        }
    }

    async fn drain(&self) {
        let timeout = self.config.shutdown_timeout;
        let pending = self.scheduler.pending();
        if pending > 0 {
            debug!(
                pending,
                timeout_ms = timeout.as_millis() as u64,
                "waiting for pending retries"
            );
        }

        let abandoned = self.scheduler.shutdown(timeout).await;
        if abandoned > 0 {
            let err = DeliveryError::ShutdownTimeout { timeout, abandoned };
            warn!(abandoned, error = %err, "pending retries abandoned at shutdown");
        }

        let stats = self.stats().await;
        info!(
            received = stats.received,
            succeeded = stats.succeeded,
            retries_scheduled = stats.retries_scheduled,
            dead_lettered = stats.dead_lettered,
            dropped = stats.dropped,
            transport_failures = stats.transport_failures,
            "orchestrator stopped"
        );
    }
}
