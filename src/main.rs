//! Orderflow order event pipeline.
//!
//! Main entry point for the orderflow service. Connects the transport,
//! creates the channels, runs the emitter and the delivery orchestrator
//! side by side and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use orderflow_core::{Channel, ChannelSpec, Clock, InMemoryBroker, RealClock, Transport};
use orderflow_delivery::{Emitter, Orchestrator, RandomFailure};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;

use config::Config;

/// Extra time given to tasks beyond the retry drain window.
const TASK_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        brokers = ?config.brokers,
        client_id = %config.client_id,
        consumer_group = %config.consumer_group,
        max_retries = config.max_retries,
        failure_rate = config.failure_rate,
        "starting orderflow"
    );

    let transport: Arc<dyn Transport> = Arc::new(
        InMemoryBroker::with_names(config.to_channel_names())
            .with_retention(config.channel_retention),
    );

    let result = run(&config, transport.clone()).await;

    // Every exit path releases the transport.
    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "failed to disconnect transport");
    }

    match &result {
        Ok(()) => info!("orderflow shutdown complete"),
        Err(e) => error!(error = %format!("{e:#}"), "orderflow stopped with error"),
    }
    result
}

/// Runs the pipeline until a shutdown signal or a task failure.
async fn run(config: &Config, transport: Arc<dyn Transport>) -> Result<()> {
    transport.connect().await.context("failed to connect to broker")?;
    info!(brokers = ?config.brokers, "connected to broker");

    ensure_channels(config, transport.as_ref()).await?;

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let predicate = RandomFailure::new(config.failure_rate).context("invalid failure rate")?;

    let emitter =
        Arc::new(Emitter::new(transport.clone(), clock.clone(), config.to_emitter_config()));
    let orchestrator = Arc::new(Orchestrator::new(
        transport,
        Arc::new(predicate),
        clock,
        config.to_orchestrator_config(),
    ));
    let reporter = orchestrator.reporter();

    let cancel = CancellationToken::new();

    let mut consumer: JoinHandle<orderflow_delivery::Result<()>> = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        async move { orchestrator.run(cancel).await }
    });
    let mut producer = tokio::spawn({
        let emitter = emitter.clone();
        let cancel = cancel.clone();
        async move { emitter.run(cancel).await }
    });

    info!(
        topic = %config.topic_orders,
        interval_ms = config.emit_interval_ms,
        "orderflow is running"
    );

    // Whichever happens first triggers the same teardown.
    let mut consumer_result = None;
    let mut producer_done = false;
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received, starting graceful shutdown");
        },
        result = &mut consumer => {
            error!("orchestrator exited unexpectedly");
            consumer_result = Some(result);
        },
        result = &mut producer => {
            error!("emitter exited unexpectedly");
            producer_done = true;
            if let Err(e) = result {
                error!(error = %e, "emitter task failed");
            }
        },
    }

    cancel.cancel();

    let grace = config.shutdown_timeout() + TASK_GRACE;
    if !producer_done {
        match tokio::time::timeout(grace, &mut producer).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!(error = %e, "emitter task failed"),
            Err(_) => {
                warn!("emitter did not stop within grace period");
                producer.abort();
            },
        }
    }

    let consumer_result = match consumer_result {
        Some(result) => Some(result),
        None => match tokio::time::timeout(grace, &mut consumer).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!("orchestrator did not stop within grace period");
                consumer.abort();
                None
            },
        },
    };

    let snapshot = reporter.snapshot().await;
    let stats = orchestrator.stats().await;
    info!(
        order_count = snapshot.order_count,
        running_average = %format!("{:.2}", snapshot.running_average().unwrap_or_default()),
        emitted = emitter.stats().await.emitted,
        retries_scheduled = stats.retries_scheduled,
        dead_lettered = stats.dead_lettered,
        "final aggregation"
    );

    match consumer_result {
        Some(Ok(result)) => result.context("orchestrator failed"),
        Some(Err(e)) => Err(e).context("orchestrator task panicked"),
        None => Ok(()),
    }
}

/// Creates every pipeline channel, logging which already existed.
async fn ensure_channels(config: &Config, transport: &dyn Transport) -> Result<()> {
    let specs = ChannelSpec::all();
    let created = transport
        .ensure_channels(&specs)
        .await
        .context("failed to create channels")?;

    let names = config.to_channel_names();
    for channel in Channel::ALL {
        let topic = names.topic(channel);
        if created.contains(&channel) {
            info!(topic, %channel, "topic created");
        } else {
            info!(topic, %channel, "topic already exists");
        }
    }
    Ok(())
}

/// Initializes tracing with environment-based configuration.
///
/// `RUST_LOG` wins over the configured filter when set.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C signal");
        },
        () = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
