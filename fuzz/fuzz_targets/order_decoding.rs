#![no_main]

//! Fuzz target for order payload decoding.
//!
//! The orchestrator feeds every inbound payload straight into the decoder,
//! so arbitrary bytes must produce either a valid order or a decode error,
//! never a panic or an oversized allocation.

use libfuzzer_sys::fuzz_target;
use orderflow_core::codec;

fuzz_target!(|data: &[u8]| {
    if let Ok(order) = codec::decode(data) {
        assert!(order.validate().is_ok());
        let reencoded = codec::encode(&order).expect("decoded order must re-encode");
        let again = codec::decode(&reencoded).expect("re-encoded order must decode");
        assert_eq!(again.order_id, order.order_id);
        assert_eq!(again.product, order.product);
        assert_eq!(again.price.to_bits(), order.price.to_bits());
    }
});
