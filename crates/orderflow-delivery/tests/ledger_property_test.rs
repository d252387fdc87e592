//! Property tests for the retry ledger against a simple counter model.

use std::collections::HashMap;

use orderflow_delivery::{FailureDecision, InMemoryRetryLedger, RetryLedger};
use orderflow_testing::property::order_id_strategy;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Fail(usize),
    Succeed(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![3 => (0usize..3).prop_map(Op::Fail), 1 => (0usize..3).prop_map(Op::Succeed)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any interleaving of failures and successes over a few orders matches
    /// a plain per-order counter that resets on success or exhaustion.
    #[test]
    fn ledger_matches_counter_model(
        ids in prop::collection::hash_set(order_id_strategy(), 3),
        ops in prop::collection::vec(op_strategy(), 0..60),
        max_retries in 0u32..5,
    ) {
        let ids: Vec<_> = ids.into_iter().collect();
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;

        runtime.block_on(async {
            let ledger = InMemoryRetryLedger::new();
            let mut model: HashMap<usize, u32> = HashMap::new();

            for op in ops {
                match op {
                    Op::Fail(i) => {
                        let n = model.get(&i).copied().unwrap_or(0);
                        let decision = ledger.record_failure(&ids[i], max_retries).await;
                        if n < max_retries {
                            prop_assert_eq!(
                                decision,
                                FailureDecision::Retry { previous_attempts: n }
                            );
                            model.insert(i, n + 1);
                        } else {
                            prop_assert_eq!(decision, FailureDecision::Exhausted { attempts: n });
                            model.remove(&i);
                        }
                    },
                    Op::Succeed(i) => {
                        ledger.delete(&ids[i]).await;
                        model.remove(&i);
                    },
                }
                prop_assert_eq!(ledger.len().await, model.len());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
