//! Builder for [`TestEnv`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use orderflow_core::{ChannelSpec, InMemoryBroker, StartPosition, TestClock, Transport};
use orderflow_delivery::{
    Orchestrator, OrchestratorConfig, RetryLedger, RetryPolicy, ScriptedOutcomes,
};
use tokio::sync::Mutex;

use crate::TestEnv;

/// Builder for configuring a [`TestEnv`].
pub struct TestEnvBuilder {
    retry_policy: RetryPolicy,
    shutdown_timeout: Duration,
    start_position: StartPosition,
    outcomes: ScriptedOutcomes,
    ledger: Option<Arc<dyn RetryLedger>>,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
            start_position: StartPosition::Latest,
            outcomes: ScriptedOutcomes::default(),
            ledger: None,
        }
    }
}

impl TestEnvBuilder {
    /// Creates a builder with the production retry policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy (default: 3 retries, 1s base, exponential).
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the retry cap, keeping the rest of the policy.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy.max_retries = max_retries;
        self
    }

    /// Sets how long shutdown waits for pending retries (default: 5s).
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets where the orchestrator's subscription starts reading.
    #[must_use]
    pub fn start_position(mut self, position: StartPosition) -> Self {
        self.start_position = position;
        self
    }

    /// Sets the processing outcomes.
    #[must_use]
    pub fn outcomes(mut self, outcomes: ScriptedOutcomes) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Every order fails, including after the script runs out.
    #[must_use]
    pub fn always_failing(self) -> Self {
        self.outcomes(ScriptedOutcomes::default().then_fail())
    }

    /// Replaces the in-memory retry ledger.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn RetryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Builds the environment with a connected broker and all channels.
    pub async fn build(self) -> Result<TestEnv> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
            )
            .with_test_writer()
            .try_init();

        let broker = InMemoryBroker::new();
        broker.connect().await.context("failed to connect test broker")?;
        broker.ensure_channels(&ChannelSpec::all()).await.context("failed to create channels")?;

        let clock = TestClock::new();
        let config = OrchestratorConfig {
            retry_policy: self.retry_policy,
            shutdown_timeout: self.shutdown_timeout,
            start_position: self.start_position,
        };

        let mut orchestrator = Orchestrator::new(
            Arc::new(broker.clone()),
            Arc::new(self.outcomes.clone()),
            Arc::new(clock.clone()),
            config,
        );
        if let Some(ledger) = self.ledger {
            orchestrator = orchestrator.with_ledger(ledger);
        }

        Ok(TestEnv {
            broker,
            clock,
            outcomes: self.outcomes,
            orchestrator: Arc::new(orchestrator),
            cursors: Mutex::new(HashMap::new()),
        })
    }
}
