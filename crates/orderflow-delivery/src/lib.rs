//! Order emission and delivery orchestration with bounded retries.
//!
//! This crate implements both ends of the order pipeline: the emitter that
//! publishes synthetic orders to the primary channel, and the orchestrator
//! that consumes them, processes each one and routes failures through a
//! retry channel with exponential backoff before giving up on the
//! dead-letter channel.
//!
//! # Architecture
//!
//! The orchestrator handles one inbound message at a time:
//!
//! 1. **Decode** - Parse the payload, dropping anything undecodable
//! 2. **Process** - Ask the injected failure predicate for an outcome
//! 3. **Aggregate** - Fold successful prices into the running average
//! 4. **Route Failures** - Schedule a delayed retry or dead-letter the order
//!
//! Retry publications are deferred tasks, so a long backoff never blocks
//! the consumption loop. Attempt counts live in a [`RetryLedger`] keyed by
//! order ID.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use orderflow_core::{ChannelSpec, InMemoryBroker, RealClock, Transport};
//! use orderflow_delivery::{Orchestrator, OrchestratorConfig, RandomFailure};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let broker = Arc::new(InMemoryBroker::new());
//! broker.connect().await?;
//! broker.ensure_channels(&ChannelSpec::all()).await?;
//!
//! let orchestrator = Orchestrator::new(
//!     broker,
//!     Arc::new(RandomFailure::default()),
//!     Arc::new(RealClock::new()),
//!     OrchestratorConfig::default(),
//! );
//! orchestrator.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod aggregation;
pub mod dead_letter;
pub mod emitter;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod processor;
pub mod retry;
pub mod scheduler;

pub use aggregation::{AggregateSnapshot, AggregationReporter, Aggregator};
pub use dead_letter::DeadLetterEnvelope;
pub use emitter::{Emitter, EmitterConfig, EmitterStats, OrderGenerator};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use ledger::{FailureDecision, InMemoryRetryLedger, RetryLedger};
pub use orchestrator::{DeliveryOutcome, Orchestrator, OrchestratorConfig, OrchestratorStats};
pub use processor::{
    AlwaysFail, FailurePredicate, NeverFail, RandomFailure, ScriptedOutcomes, DEFAULT_FAILURE_RATE,
};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use scheduler::{RetryScheduler, ScheduledRetry};
