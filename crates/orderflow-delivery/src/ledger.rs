//! Retry ledger: per-order failed attempt counters.
//!
//! The ledger is owned by the orchestrator and sits behind the
//! [`RetryLedger`] trait so it can be swapped for a durable store. The
//! bundled [`InMemoryRetryLedger`] is volatile: counts are lost when the
//! process restarts, so an order that was mid-retry starts its budget over.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use orderflow_core::OrderId;
use tokio::sync::Mutex;

type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of recording a failure against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Attempt count was below the cap and has been incremented.
    Retry {
        /// Count observed before the increment
        previous_attempts: u32,
    },
    /// Attempt count had reached the cap; the entry has been removed.
    Exhausted {
        /// Count observed when the cap was hit
        attempts: u32,
    },
}

/// Storage for per-order retry attempt counts.
///
/// `record_failure` must be atomic per order: two concurrent failures for
/// one order never observe the same pre-increment count.
pub trait RetryLedger: Send + Sync + std::fmt::Debug + 'static {
    /// Returns the attempt count for an order, `None` if absent.
    fn get<'a>(&'a self, order_id: &'a OrderId) -> LedgerFuture<'a, Option<u32>>;

    /// Sets the attempt count for an order.
    fn set<'a>(&'a self, order_id: &'a OrderId, attempts: u32) -> LedgerFuture<'a, ()>;

    /// Removes the entry for an order, returning the previous count.
    fn delete<'a>(&'a self, order_id: &'a OrderId) -> LedgerFuture<'a, Option<u32>>;

    /// Number of orders currently tracked.
    fn len(&self) -> LedgerFuture<'_, usize>;

    /// Reads the count `n` (0 if absent) and, in one step, either stores
    /// `n + 1` when `n < max_retries` or removes the entry otherwise.
    fn record_failure<'a>(
        &'a self,
        order_id: &'a OrderId,
        max_retries: u32,
    ) -> LedgerFuture<'a, FailureDecision>;
}

/// Volatile ledger backed by a mutex-guarded map.
///
/// Entries are removed only on success or exhaustion. An order whose retry
/// publication was lost keeps its entry for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetryLedger {
    entries: Arc<Mutex<HashMap<OrderId, u32>>>,
}

impl InMemoryRetryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetryLedger for InMemoryRetryLedger {
    fn get<'a>(&'a self, order_id: &'a OrderId) -> LedgerFuture<'a, Option<u32>> {
        Box::pin(async move { self.entries.lock().await.get(order_id).copied() })
    }

    fn set<'a>(&'a self, order_id: &'a OrderId, attempts: u32) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.insert(order_id.clone(), attempts);
        })
    }

    fn delete<'a>(&'a self, order_id: &'a OrderId) -> LedgerFuture<'a, Option<u32>> {
        Box::pin(async move { self.entries.lock().await.remove(order_id) })
    }

    fn len(&self) -> LedgerFuture<'_, usize> {
        Box::pin(async move { self.entries.lock().await.len() })
    }

    fn record_failure<'a>(
        &'a self,
        order_id: &'a OrderId,
        max_retries: u32,
    ) -> LedgerFuture<'a, FailureDecision> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let previous_attempts = entries.get(order_id).copied().unwrap_or(0);

            if previous_attempts < max_retries {
                entries.insert(order_id.clone(), previous_attempts + 1);
                FailureDecision::Retry { previous_attempts }
            } else {
                entries.remove(order_id);
                FailureDecision::Exhausted { attempts: previous_attempts }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> OrderId {
        OrderId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn get_set_delete() {
        let ledger = InMemoryRetryLedger::new();
        let order = id("1001");

        assert_eq!(ledger.get(&order).await, None);
        ledger.set(&order, 2).await;
        assert_eq!(ledger.get(&order).await, Some(2));
        assert_eq!(ledger.delete(&order).await, Some(2));
        assert_eq!(ledger.get(&order).await, None);
        assert_eq!(ledger.delete(&order).await, None);
    }

    #[tokio::test]
    async fn record_failure_increments_until_cap() {
        let ledger = InMemoryRetryLedger::new();
        let order = id("1001");

        for expected in 0..3 {
            assert_eq!(
                ledger.record_failure(&order, 3).await,
                FailureDecision::Retry { previous_attempts: expected }
            );
        }
        assert_eq!(ledger.get(&order).await, Some(3));

        assert_eq!(
            ledger.record_failure(&order, 3).await,
            FailureDecision::Exhausted { attempts: 3 }
        );
        assert_eq!(ledger.get(&order).await, None);
        assert_eq!(ledger.len().await, 0);
    }

    #[tokio::test]
    async fn entries_are_independent_per_order() {
        let ledger = InMemoryRetryLedger::new();
        ledger.record_failure(&id("a"), 3).await;
        ledger.record_failure(&id("a"), 3).await;
        ledger.record_failure(&id("b"), 3).await;

        assert_eq!(ledger.get(&id("a")).await, Some(2));
        assert_eq!(ledger.get(&id("b")).await, Some(1));
        assert_eq!(ledger.len().await, 2);
    }
}
