#![no_main]

//! Fuzz target for externally submitted JSON records.
//!
//! Records accepted by schema validation must encode and decode back to the
//! same order.

use libfuzzer_sys::fuzz_target;
use orderflow_core::codec;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    if let Ok(order) = codec::order_from_value(&value) {
        let encoded = codec::encode(&order).expect("validated order must encode");
        let decoded = codec::decode(&encoded).expect("encoded order must decode");
        assert_eq!(decoded.order_id, order.order_id);
        assert_eq!(decoded.product, order.product);
        assert_eq!(decoded.price.to_bits(), order.price.to_bits());
    }
});
