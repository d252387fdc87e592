//! Integration tests for order emission.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use orderflow_core::{
    channel::TransportFuture, codec, Channel, ChannelSpec, InMemoryBroker, OutboundMessage,
    StartPosition, Subscription, TestClock, Transport,
};
use orderflow_delivery::{DeliveryError, Emitter, EmitterConfig};
use orderflow_testing::{fixtures, TestEnv};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn seeded(start: u64) -> EmitterConfig {
    EmitterConfig { order_id_start: start, seed: Some(11), ..EmitterConfig::default() }
}

#[tokio::test]
async fn emit_once_publishes_keyed_avro_message() -> Result<()> {
    let env = TestEnv::new().await?;
    let emitter = env.emitter(seeded(1001));

    let first = emitter.emit_once().await?;
    let second = emitter.emit_once().await?;

    assert_eq!(first.order_id.as_str(), "1001");
    assert_eq!(second.order_id.as_str(), "1002");

    let published = env.messages(Channel::Primary).await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].key_lossy(), "1001");
    assert_eq!(published[0].header("content-type"), Some("application/avro"));
    assert!(published[0].header("timestamp").is_some());
    assert_eq!(codec::decode(&published[0].payload)?, first);
    assert_eq!(codec::decode(&published[1].payload)?, second);

    assert_eq!(emitter.stats().await.emitted, 2);
    Ok(())
}

#[tokio::test]
async fn submit_value_accepts_schema_conforming_json() -> Result<()> {
    let env = TestEnv::new().await?;
    let emitter = env.emitter(EmitterConfig::default());

    let order = emitter
        .submit_value(&json!({"orderId": "ext-7", "product": "Item2", "price": 18.5, "note": "x"}))
        .await?;

    assert_eq!(order, fixtures::order_with_product("ext-7", "Item2", 18.5));
    let published = env.messages(Channel::Primary).await;
    assert_eq!(codec::decode(&published[0].payload)?, order);
    Ok(())
}

#[tokio::test]
async fn schema_violation_publishes_nothing() -> Result<()> {
    let env = TestEnv::new().await?;
    let emitter = env.emitter(EmitterConfig::default());

    let err = emitter
        .submit_value(&json!({"orderId": "1001", "product": "Item1", "price": "12.00"}))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::SchemaViolation { ref field, .. } if field == "price"));

    let err = emitter
        .submit(orderflow_core::Order {
            order_id: orderflow_core::OrderId::from_counter(1),
            product: "Item1".to_string(),
            price: -1.0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::SchemaViolation { .. }));

    assert!(env.messages(Channel::Primary).await.is_empty());
    assert_eq!(emitter.stats().await.emitted, 0);
    Ok(())
}

#[tokio::test]
async fn publish_failure_is_reported_and_counted() -> Result<()> {
    let env = TestEnv::new().await?;
    env.broker.fail_publishes(Channel::Primary, 1).await;
    let emitter = env.emitter(seeded(1001));

    let err = emitter.emit_once().await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transport { channel: Channel::Primary, .. }));

    let next = emitter.emit_once().await?;
    assert_eq!(next.order_id.as_str(), "1002");

    let stats = emitter.stats().await;
    assert_eq!(stats.emitted, 1);
    assert_eq!(stats.failed, 1);
    Ok(())
}

#[tokio::test]
async fn emit_requires_connected_transport() {
    let emitter = Emitter::new(
        Arc::new(InMemoryBroker::new()),
        Arc::new(TestClock::new()),
        EmitterConfig::default(),
    );

    let err = emitter.emit_once().await.unwrap_err();

    assert!(matches!(err, DeliveryError::Transport { .. }));
}

#[tokio::test]
async fn run_keeps_emitting_after_publish_failures() -> Result<()> {
    let env = TestEnv::new().await?;
    env.broker.fail_publishes(Channel::Primary, 2).await;
    let emitter = Arc::new(env.emitter(EmitterConfig {
        emit_interval: Duration::from_millis(1),
        ..seeded(1001)
    }));

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let emitter = emitter.clone();
        let cancel = cancel.clone();
        async move { emitter.run(cancel).await }
    });

    env.wait_for_messages(Channel::Primary, 3, Duration::from_secs(5)).await?;
    cancel.cancel();
    task.await?;

    let stats = emitter.stats().await;
    assert_eq!(stats.failed, 2);
    assert!(stats.emitted >= 3);

    let published = env.messages(Channel::Primary).await;
    assert_eq!(published[0].key_lossy(), "1003");
    Ok(())
}

#[tokio::test]
async fn run_sleeps_the_configured_interval() -> Result<()> {
    let env = TestEnv::new().await?;
    let emitter = Arc::new(env.emitter(EmitterConfig {
        emit_interval: Duration::from_secs(2),
        ..seeded(1)
    }));

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let emitter = emitter.clone();
        let cancel = cancel.clone();
        async move { emitter.run(cancel).await }
    });

    env.wait_for_messages(Channel::Primary, 2, Duration::from_secs(5)).await?;
    cancel.cancel();
    task.await?;

    let sleeps = env.recorded_sleeps();
    assert!(sleeps.len() >= 2);
    assert!(sleeps.iter().all(|d| *d == Duration::from_secs(2)));
    Ok(())
}

/// Broker whose publishes take `latency` of virtual time.
struct SlowBroker {
    inner: InMemoryBroker,
    clock: TestClock,
    latency: Duration,
}

impl Transport for SlowBroker {
    fn connect(&self) -> TransportFuture<'_, ()> {
        self.inner.connect()
    }

    fn ensure_channels<'a>(
        &'a self,
        specs: &'a [ChannelSpec],
    ) -> TransportFuture<'a, Vec<Channel>> {
        self.inner.ensure_channels(specs)
    }

    fn publish(&self, channel: Channel, message: OutboundMessage) -> TransportFuture<'_, ()> {
        self.clock.advance(self.latency);
        self.inner.publish(channel, message)
    }

    fn subscribe<'a>(
        &'a self,
        channels: &'a [Channel],
        start: StartPosition,
    ) -> TransportFuture<'a, Subscription> {
        self.inner.subscribe(channels, start)
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        self.inner.disconnect()
    }
}

async fn run_against_slow_broker(latency: Duration) -> Result<Vec<Duration>> {
    let env = TestEnv::new().await?;
    let transport = Arc::new(SlowBroker {
        inner: env.broker.clone(),
        clock: env.clock.clone(),
        latency,
    });
    let emitter = Arc::new(Emitter::new(
        transport,
        Arc::new(env.clock.clone()),
        EmitterConfig { emit_interval: Duration::from_secs(2), ..seeded(1) },
    ));

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let emitter = emitter.clone();
        let cancel = cancel.clone();
        async move { emitter.run(cancel).await }
    });

    env.wait_for_messages(Channel::Primary, 3, Duration::from_secs(5)).await?;
    cancel.cancel();
    task.await?;

    Ok(env.recorded_sleeps())
}

#[tokio::test]
async fn run_subtracts_publish_latency_from_the_next_sleep() -> Result<()> {
    let sleeps = run_against_slow_broker(Duration::from_millis(500)).await?;

    assert!(sleeps.len() >= 3, "sleeps: {sleeps:?}");
    assert_eq!(sleeps[0], Duration::from_secs(2));
    assert!(sleeps[1..].iter().all(|d| *d == Duration::from_millis(1500)), "sleeps: {sleeps:?}");
    Ok(())
}

#[tokio::test]
async fn run_skips_ticks_missed_by_a_slow_publish() -> Result<()> {
    let sleeps = run_against_slow_broker(Duration::from_millis(4500)).await?;

    // Each publish overruns two ticks; the next fires on the following tick boundary.
    assert!(sleeps.len() >= 3, "sleeps: {sleeps:?}");
    assert_eq!(sleeps[0], Duration::from_secs(2));
    assert!(sleeps[1..].iter().all(|d| *d == Duration::from_millis(1500)), "sleeps: {sleeps:?}");
    Ok(())
}

#[tokio::test]
async fn cancelled_emitter_stops_without_emitting() -> Result<()> {
    let env = TestEnv::new().await?;
    let emitter = env.emitter(EmitterConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), emitter.run(cancel)).await?;

    assert_eq!(emitter.stats().await, Default::default());
    assert!(env.messages(Channel::Primary).await.is_empty());
    Ok(())
}
