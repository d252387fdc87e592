//! End-to-end tests running the emitter and orchestrator together over the
//! in-memory broker.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use orderflow_core::{codec, Channel};
use orderflow_delivery::{EmitterConfig, OrchestratorStats};
use orderflow_testing::{ScriptedOutcomes, TestEnv};
use tokio_util::sync::CancellationToken;

/// Every emitted order ends in exactly one terminal state: counted in the
/// aggregate or published once to the dead-letter channel.
#[tokio::test]
async fn every_emitted_order_reaches_one_terminal_state() -> Result<()> {
    // 1001 fails on every attempt, 1002 fails once, the rest succeed.
    let env = TestEnv::builder()
        .outcomes(ScriptedOutcomes::new([true, true, true, true, true, false]))
        .build()
        .await?;
    let emitter = env.emitter(EmitterConfig {
        order_id_start: 1001,
        seed: Some(5),
        ..EmitterConfig::default()
    });

    let mut emitted = Vec::new();
    let mut outcomes = Vec::new();
    for _ in 0..5 {
        emitted.push(emitter.emit_once().await?);
        outcomes.extend(env.deliver_pending().await?);
    }
    assert_eq!(outcomes.len(), 9);

    let dead = env.messages(Channel::DeadLetter).await;
    let dead_ids: Vec<_> = dead.iter().map(|m| m.key_lossy()).collect();
    assert_eq!(dead_ids, vec!["1001"]);

    let snapshot = env.snapshot().await;
    assert_eq!(snapshot.order_count, 4);
    let expected_total: f64 = emitted[1..].iter().map(|o| o.price).sum();
    assert!((snapshot.total_price - expected_total).abs() < 1e-9);

    for message in &dead {
        assert_eq!(codec::decode(&message.payload)?, emitted[0]);
    }
    assert_eq!(env.ledger_len().await, 0);

    assert_eq!(
        env.stats().await,
        OrchestratorStats {
            received: 9,
            succeeded: 4,
            retries_scheduled: 4,
            dead_lettered: 1,
            dropped: 0,
            transport_failures: 0,
        }
    );
    Ok(())
}

#[tokio::test]
async fn running_tasks_share_one_cancellation_token() -> Result<()> {
    let env = TestEnv::new().await?;
    let emitter = Arc::new(env.emitter(EmitterConfig {
        emit_interval: Duration::from_millis(1),
        seed: Some(9),
        ..EmitterConfig::default()
    }));
    let orchestrator = env.orchestrator();
    let cancel = CancellationToken::new();

    let consumer = tokio::spawn({
        let cancel = cancel.clone();
        async move { orchestrator.run(cancel).await }
    });
    // Give the consumer a chance to subscribe before anything is emitted.
    tokio::task::yield_now().await;
    let producer = tokio::spawn({
        let emitter = emitter.clone();
        let cancel = cancel.clone();
        async move { emitter.run(cancel).await }
    });

    let processed = tokio::time::timeout(Duration::from_secs(5), async {
        while env.snapshot().await.order_count < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(processed.is_ok(), "pipeline stalled: {:?}", env.stats().await);

    cancel.cancel();
    producer.await?;
    consumer.await??;

    assert!(emitter.stats().await.emitted >= 5);
    assert_eq!(env.stats().await.dead_lettered, 0);
    Ok(())
}
