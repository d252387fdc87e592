//! Proptest strategies for orders and processing scripts.

use orderflow_core::{Order, OrderId};
use proptest::prelude::{prop, Strategy};

/// Non-empty order identifiers, mostly numeric like generated ones.
pub fn order_id_strategy() -> impl Strategy<Value = OrderId> {
    "[0-9]{1,8}|[A-Za-z0-9_-]{1,24}"
        .prop_filter_map("order id must be non-empty", |s| OrderId::new(s).ok())
}

/// Prices in cents between 0.00 and 10,000.00.
pub fn price_strategy() -> impl Strategy<Value = f64> {
    (0u64..1_000_000).prop_map(|cents| cents as f64 / 100.0)
}

/// Arbitrary valid orders.
pub fn order_strategy() -> impl Strategy<Value = Order> {
    (order_id_strategy(), "[ -~]{0,32}", price_strategy())
        .prop_map(|(order_id, product, price)| Order { order_id, product, price })
}

/// Sequences of processing outcomes, `true` meaning fail.
pub fn outcome_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(prop::bool::ANY, 0..=max_len)
}
