//! Test infrastructure for deterministic pipeline testing.
//!
//! Provides an in-memory broker with all channels created, a controllable
//! clock, scripted processing outcomes, fixture builders and proptest
//! strategies. [`TestEnv::deliver_pending`] drives the orchestrator by hand
//! over everything published so far, so tests observe each routing decision
//! without running the consumption loop.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{bail, Result};
pub use orderflow_core::{Channel, InMemoryBroker, InboundMessage, Order, TestClock};
use orderflow_core::{OrderId, OutboundMessage, Transport};
pub use orderflow_delivery::ScriptedOutcomes;
use orderflow_delivery::{
    AggregateSnapshot, DeliveryOutcome, Emitter, EmitterConfig, Orchestrator, OrchestratorStats,
};
use tokio::sync::Mutex;

pub mod fixtures;
pub mod property;

mod env_core;

pub use env_core::TestEnvBuilder;

/// Upper bound on how long the harness waits for scheduled retries to land.
const RETRY_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Self-contained pipeline for integration tests.
///
/// Owns a connected broker with all three channels, a [`TestClock`] that
/// records every backoff sleep, and an orchestrator whose processing
/// outcomes come from [`ScriptedOutcomes`].
pub struct TestEnv {
    /// Broker shared by the emitter and the orchestrator
    pub broker: InMemoryBroker,
    /// Deterministic clock; backoff sleeps complete instantly
    pub clock: TestClock,
    /// Queue of processing outcomes, `true` meaning fail
    pub outcomes: ScriptedOutcomes,
    /// Orchestrator under test
    orchestrator: Arc<Orchestrator>,
    /// How far `deliver_pending` has read each inbound channel
    cursors: Mutex<HashMap<Channel, u64>>,
}

impl TestEnv {
    /// Creates an environment where every order succeeds unless scripted
    /// otherwise.
    pub async fn new() -> Result<Self> {
        TestEnvBuilder::new().build().await
    }

    /// Creates a builder for custom retry policy or outcome defaults.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// The orchestrator under test.
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    /// Creates an emitter publishing to this environment's broker.
    pub fn emitter(&self, config: EmitterConfig) -> Emitter {
        Emitter::new(Arc::new(self.broker.clone()), Arc::new(self.clock.clone()), config)
    }

    /// Publishes an order to the primary channel as an emitter would.
    pub async fn publish_order(&self, order: &Order) -> Result<()> {
        let message = fixtures::order_message(order, &self.clock)?;
        self.broker.publish(Channel::Primary, message).await?;
        Ok(())
    }

    /// Publishes arbitrary bytes to the primary channel.
    pub async fn publish_raw(&self, key: &str, payload: &[u8]) -> Result<()> {
        let message = OutboundMessage::new(
            bytes::Bytes::copy_from_slice(key.as_bytes()),
            bytes::Bytes::copy_from_slice(payload),
            fixtures::order_headers(&self.clock),
        );
        self.broker.publish(Channel::Primary, message).await?;
        Ok(())
    }

    /// Hands every not-yet-seen primary and retry message to the
    /// orchestrator, waiting for scheduled retries to be published, until
    /// no new messages appear.
    ///
    /// Returns the outcome of each message in handling order.
    pub async fn deliver_pending(&self) -> Result<Vec<DeliveryOutcome>> {
        let mut outcomes = Vec::new();

        loop {
            let batch = self.take_unseen().await;
            if batch.is_empty() {
                return Ok(outcomes);
            }

            for message in batch {
                outcomes.push(self.orchestrator.handle_message(message).await);
            }
            self.settle_retries().await?;
        }
    }

    /// Waits until no retry publication is pending.
    pub async fn settle_retries(&self) -> Result<()> {
        let settled = tokio::time::timeout(RETRY_SETTLE_TIMEOUT, async {
            while self.orchestrator.pending_retries() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await;

        if settled.is_err() {
            bail!(
                "{} retries still pending after {:?}",
                self.orchestrator.pending_retries(),
                RETRY_SETTLE_TIMEOUT
            );
        }
        Ok(())
    }

    /// Messages published to a channel so far.
    pub async fn messages(&self, channel: Channel) -> Vec<InboundMessage> {
        self.broker.messages(channel).await
    }

    /// Waits until a channel holds at least `count` messages.
    pub async fn wait_for_messages(
        &self,
        channel: Channel,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let messages = self.broker.messages(channel).await;
                if messages.len() >= count {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        match waited {
            Ok(messages) => Ok(messages),
            Err(_) => bail!("expected {count} messages on {channel} within {timeout:?}"),
        }
    }

    /// Retry attempts recorded for an order.
    pub async fn ledger_entry(&self, order_id: &str) -> Result<Option<u32>> {
        let id = OrderId::new(order_id)?;
        Ok(self.orchestrator.ledger().get(&id).await)
    }

    /// Number of orders the ledger is tracking.
    pub async fn ledger_len(&self) -> usize {
        self.orchestrator.ledger().len().await
    }

    /// Current aggregation state.
    pub async fn snapshot(&self) -> AggregateSnapshot {
        self.orchestrator.reporter().snapshot().await
    }

    /// Orchestrator counters.
    pub async fn stats(&self) -> OrchestratorStats {
        self.orchestrator.stats().await
    }

    /// Every backoff the scheduler slept for, in order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.clock.recorded_sleeps()
    }

    async fn take_unseen(&self) -> Vec<InboundMessage> {
        let mut cursors = self.cursors.lock().await;
        let mut unseen = Vec::new();

        for channel in Channel::INBOUND {
            let messages = self.broker.messages(channel).await;
            let cursor = cursors.entry(channel).or_insert(0);
            let fresh: Vec<_> = messages.into_iter().filter(|m| m.offset >= *cursor).collect();
            if let Some(last) = fresh.last() {
                *cursor = last.offset + 1;
            }
            unseen.extend(fresh);
        }
        unseen
    }
}
