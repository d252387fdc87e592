//! Order fixtures and pre-built channel messages.

use bytes::Bytes;
use orderflow_core::{
    codec, epoch_millis, headers, Channel, Clock, Headers, InboundMessage, Order, OrderId,
    OutboundMessage, CONTENT_TYPE_AVRO,
};

/// Bytes that cannot be decoded as an order: a string length prefix that
/// claims more data than follows.
pub const CORRUPTED_PAYLOAD: &[u8] = &[0x7e, 0x31, 0x30];

/// Builds a valid order.
///
/// # Panics
///
/// Panics if `order_id` is empty or `price` is negative.
pub fn order(order_id: &str, price: f64) -> Order {
    order_with_product(order_id, "Item1", price)
}

/// Builds a valid order for a specific product.
///
/// # Panics
///
/// Panics if `order_id` is empty or `price` is negative.
#[allow(clippy::expect_used)]
pub fn order_with_product(order_id: &str, product: &str, price: f64) -> Order {
    let id = OrderId::new(order_id).expect("fixture order id must be non-empty");
    Order::new(id, product, price).expect("fixture order must be valid")
}

/// Headers an emitter attaches to a primary-channel message.
pub fn order_headers(clock: &dyn Clock) -> Headers {
    let mut headers = Headers::new();
    headers.insert(headers::CONTENT_TYPE.to_string(), CONTENT_TYPE_AVRO.to_string());
    headers.insert(headers::TIMESTAMP.to_string(), epoch_millis(clock).to_string());
    headers
}

/// Encodes an order into a primary-channel message keyed by its ID.
pub fn order_message(order: &Order, clock: &dyn Clock) -> anyhow::Result<OutboundMessage> {
    let payload = codec::encode(order)?;
    Ok(OutboundMessage::new(
        Bytes::copy_from_slice(order.order_id.as_bytes()),
        payload,
        order_headers(clock),
    ))
}

/// Builds an inbound message as the orchestrator would receive it.
pub fn inbound(
    channel: Channel,
    offset: u64,
    order: &Order,
    clock: &dyn Clock,
) -> anyhow::Result<InboundMessage> {
    let message = order_message(order, clock)?;
    Ok(InboundMessage {
        channel,
        offset,
        key: message.key,
        payload: message.payload,
        headers: message.headers,
        timestamp_ms: epoch_millis(clock),
    })
}

/// Builds an inbound message carrying arbitrary bytes.
pub fn raw_inbound(channel: Channel, offset: u64, payload: &[u8]) -> InboundMessage {
    InboundMessage {
        channel,
        offset,
        key: Bytes::from_static(b"unknown"),
        payload: Bytes::copy_from_slice(payload),
        headers: Headers::new(),
        timestamp_ms: 0,
    }
}
