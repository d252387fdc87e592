//! Running totals over successfully processed orders.
//!
//! The orchestrator is the only writer. [`AggregationReporter`] is a
//! read-only handle that can be handed to anything that wants to report the
//! current count and running average.

use std::sync::Arc;

use tokio::sync::RwLock;

/// Point-in-time view of the aggregation state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregateSnapshot {
    /// Number of successfully processed orders.
    pub order_count: u64,
    /// Sum of their prices.
    pub total_price: f64,
}

impl AggregateSnapshot {
    /// Mean price, `None` before the first success.
    pub fn running_average(&self) -> Option<f64> {
        if self.order_count == 0 {
            return None;
        }
        Some(self.total_price / self.order_count as f64)
    }
}

/// Process-wide aggregation state. Starts at zero.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    state: Arc<RwLock<AggregateSnapshot>>,
}

impl Aggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a successful order's price and returns the updated totals.
    pub async fn record_success(&self, price: f64) -> AggregateSnapshot {
        let mut state = self.state.write().await;
        state.total_price += price;
        state.order_count += 1;
        *state
    }

    /// Current totals.
    pub async fn snapshot(&self) -> AggregateSnapshot {
        *self.state.read().await
    }

    /// Read-only handle over the same state.
    pub fn reporter(&self) -> AggregationReporter {
        AggregationReporter { state: self.state.clone() }
    }
}

/// Read-only view over an [`Aggregator`].
#[derive(Debug, Clone)]
pub struct AggregationReporter {
    state: Arc<RwLock<AggregateSnapshot>>,
}

impl AggregationReporter {
    /// Number of successfully processed orders.
    pub async fn order_count(&self) -> u64 {
        self.state.read().await.order_count
    }

    /// Mean price of successfully processed orders.
    pub async fn running_average(&self) -> Option<f64> {
        self.state.read().await.running_average()
    }

    /// Current totals.
    pub async fn snapshot(&self) -> AggregateSnapshot {
        *self.state.read().await
    }
}
