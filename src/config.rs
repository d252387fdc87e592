//! Configuration for the orderflow service.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use orderflow_core::{ChannelNames, StartPosition, DEFAULT_RETENTION};
use orderflow_delivery::{
    BackoffStrategy, EmitterConfig, OrchestratorConfig, RetryPolicy, DEFAULT_FAILURE_RATE,
    DEFAULT_MAX_RETRIES,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "orderflow.toml";

const ENV_PREFIX: &str = "ORDERFLOW_";

/// Highest accepted retry cap. Exponential delays stop growing well before.
const MAX_RETRY_CAP: u32 = 20;

/// Service configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `ORDERFLOW_` (highest priority)
/// 2. Configuration file (`orderflow.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The defaults reproduce the reference deployment: three retries with
/// 1s/2s/4s backoff, a 20% simulated failure rate and a 2s emit cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Transport
    /// Broker addresses.
    ///
    /// Environment variable: `ORDERFLOW_BROKERS` (e.g. `[localhost:9092]`)
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    /// Client identifier presented to the broker.
    ///
    /// Environment variable: `ORDERFLOW_CLIENT_ID`
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Consumer group the orchestrator joins.
    ///
    /// Environment variable: `ORDERFLOW_CONSUMER_GROUP`
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Replay existing messages on startup instead of only new ones.
    ///
    /// Environment variable: `ORDERFLOW_FROM_BEGINNING`
    #[serde(default)]
    pub from_beginning: bool,
    /// Messages the in-memory broker keeps per channel.
    ///
    /// Environment variable: `ORDERFLOW_CHANNEL_RETENTION`
    #[serde(default = "default_channel_retention")]
    pub channel_retention: usize,

    // Topics
    /// Primary channel topic.
    #[serde(default = "default_topic_orders")]
    pub topic_orders: String,
    /// Retry channel topic.
    #[serde(default = "default_topic_retry")]
    pub topic_retry: String,
    /// Dead-letter channel topic.
    #[serde(default = "default_topic_dlq")]
    pub topic_dlq: String,

    // Emitter
    /// Milliseconds between emitted orders.
    ///
    /// Environment variable: `ORDERFLOW_EMIT_INTERVAL_MS`
    #[serde(default = "default_emit_interval_ms")]
    pub emit_interval_ms: u64,
    /// First generated order ID.
    ///
    /// Environment variable: `ORDERFLOW_ORDER_ID_START`
    #[serde(default = "default_order_id_start")]
    pub order_id_start: u64,
    /// Seed for reproducible products and prices.
    ///
    /// Environment variable: `ORDERFLOW_SEED`
    #[serde(default)]
    pub seed: Option<u64>,

    // Processing
    /// Probability that a processing attempt fails (0.0 to 1.0).
    ///
    /// Environment variable: `ORDERFLOW_FAILURE_RATE`
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    // Retry
    /// Retries allowed after the first failed attempt.
    ///
    /// Environment variable: `ORDERFLOW_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    ///
    /// Environment variable: `ORDERFLOW_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `ORDERFLOW_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `ORDERFLOW_RETRY_JITTER_FACTOR`
    #[serde(default)]
    pub retry_jitter_factor: f64,
    /// How retry delays grow: `exponential`, `linear` or `fixed`.
    ///
    /// Environment variable: `ORDERFLOW_RETRY_BACKOFF_STRATEGY`
    #[serde(default = "default_backoff_strategy")]
    pub retry_backoff_strategy: BackoffStrategy,

    // Lifecycle
    /// Seconds to wait for pending retries at shutdown.
    ///
    /// Environment variable: `ORDERFLOW_SHUTDOWN_TIMEOUT_SECS`
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `ORDERFLOW_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `orderflow.toml`, and
    /// `ORDERFLOW_*` environment variables, then validates it.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() || self.brokers.iter().any(String::is_empty) {
            anyhow::bail!("brokers must list at least one non-empty address");
        }

        if self.client_id.is_empty() {
            anyhow::bail!("client_id must not be empty");
        }

        if self.consumer_group.is_empty() {
            anyhow::bail!("consumer_group must not be empty");
        }

        let topics = [&self.topic_orders, &self.topic_retry, &self.topic_dlq];
        if topics.iter().any(|t| t.is_empty()) {
            anyhow::bail!("topic names must not be empty");
        }
        if topics[0] == topics[1] || topics[0] == topics[2] || topics[1] == topics[2] {
            anyhow::bail!("topic_orders, topic_retry and topic_dlq must be distinct");
        }

        if self.channel_retention == 0 {
            anyhow::bail!("channel_retention must be greater than 0");
        }

        if self.emit_interval_ms == 0 {
            anyhow::bail!("emit_interval_ms must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.failure_rate) {
            anyhow::bail!("failure_rate must be between 0.0 and 1.0");
        }

        if self.max_retries > MAX_RETRY_CAP {
            anyhow::bail!("max_retries must not exceed {MAX_RETRY_CAP}");
        }

        if self.retry_base_delay_ms == 0 {
            anyhow::bail!("retry_base_delay_ms must be greater than 0");
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms cannot be less than retry_base_delay_ms");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        Ok(())
    }

    /// Converts to the retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: self.retry_backoff_strategy,
        }
    }

    /// Converts to orchestrator configuration.
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry_policy: self.to_retry_policy(),
            shutdown_timeout: self.shutdown_timeout(),
            start_position: if self.from_beginning {
                StartPosition::Earliest
            } else {
                StartPosition::Latest
            },
        }
    }

    /// Converts to emitter configuration.
    pub fn to_emitter_config(&self) -> EmitterConfig {
        EmitterConfig {
            emit_interval: Duration::from_millis(self.emit_interval_ms),
            order_id_start: self.order_id_start,
            seed: self.seed,
        }
    }

    /// Topic names for the three channels.
    pub fn to_channel_names(&self) -> ChannelNames {
        ChannelNames {
            primary: self.topic_orders.clone(),
            retry: self.topic_retry.clone(),
            dead_letter: self.topic_dlq.clone(),
        }
    }

    /// Grace period for pending retries at shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: default_client_id(),
            consumer_group: default_consumer_group(),
            from_beginning: false,
            channel_retention: default_channel_retention(),
            topic_orders: default_topic_orders(),
            topic_retry: default_topic_retry(),
            topic_dlq: default_topic_dlq(),
            emit_interval_ms: default_emit_interval_ms(),
            order_id_start: default_order_id_start(),
            seed: None,
            failure_rate: default_failure_rate(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: 0.0,
            retry_backoff_strategy: default_backoff_strategy(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            rust_log: default_log_level(),
        }
    }
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_client_id() -> String {
    "order-processing-system".to_string()
}

fn default_consumer_group() -> String {
    "order-processing-group".to_string()
}

fn default_channel_retention() -> usize {
    DEFAULT_RETENTION
}

fn default_topic_orders() -> String {
    ChannelNames::default().primary
}

fn default_topic_retry() -> String {
    ChannelNames::default().retry
}

fn default_topic_dlq() -> String {
    ChannelNames::default().dead_letter
}

fn default_emit_interval_ms() -> u64 {
    2000
}

fn default_order_id_start() -> u64 {
    orderflow_delivery::emitter::DEFAULT_ORDER_ID_START
}

fn default_failure_rate() -> f64 {
    DEFAULT_FAILURE_RATE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60000
}

fn default_backoff_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info,orderflow=debug".to_string()
}
