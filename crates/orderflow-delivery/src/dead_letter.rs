//! Dead-letter envelope for orders that exhausted their retry budget.
//!
//! The envelope travels as the original payload plus metadata headers, so
//! anything that can read the primary channel can also read the DLQ. It is
//! written once per order and never read back by the orchestrator.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use orderflow_core::{codec, headers, Headers, InboundMessage, Order, OutboundMessage};

use crate::error::{DeliveryError, Result};

/// An order plus the reason it was dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEnvelope {
    /// The order that could not be processed.
    pub order: Order,
    /// Description of the last processing failure.
    pub error_message: String,
    /// Retries made before giving up.
    pub retry_attempts: u32,
    /// When the order was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEnvelope {
    /// Renders the envelope as a message for the dead-letter channel.
    ///
    /// The original payload is forwarded byte for byte and the inbound
    /// headers are kept, with the dead-letter metadata added on top.
    pub fn to_message(&self, payload: Bytes, inbound_headers: &Headers) -> OutboundMessage {
        let mut headers = inbound_headers.clone();
        headers.insert(headers::ERROR_MESSAGE.to_string(), self.error_message.clone());
        headers.insert(
            headers::DLQ_TIMESTAMP.to_string(),
            self.dead_lettered_at.timestamp_millis().to_string(),
        );
        headers.insert(headers::RETRY_ATTEMPTS.to_string(), self.retry_attempts.to_string());

        OutboundMessage::new(
            Bytes::copy_from_slice(self.order.order_id.as_bytes()),
            payload,
            headers,
        )
    }

    /// Parses a message read from the dead-letter channel.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the payload is not a valid order or a
    /// dead-letter header is missing or malformed.
    pub fn from_message(message: &InboundMessage) -> Result<Self> {
        let order = codec::decode(&message.payload)?;

        let error_message = required_header(message, headers::ERROR_MESSAGE)?.to_string();
        let retry_attempts = required_header(message, headers::RETRY_ATTEMPTS)?
            .parse::<u32>()
            .map_err(|e| DeliveryError::Decode {
                reason: format!("invalid {} header: {e}", headers::RETRY_ATTEMPTS),
            })?;
        let dead_lettered_at = required_header(message, headers::DLQ_TIMESTAMP)?
            .parse::<i64>()
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| DeliveryError::Decode {
                reason: format!("invalid {} header", headers::DLQ_TIMESTAMP),
            })?;

        Ok(Self { order, error_message, retry_attempts, dead_lettered_at })
    }
}

fn required_header<'a>(message: &'a InboundMessage, name: &str) -> Result<&'a str> {
    message
        .header(name)
        .ok_or_else(|| DeliveryError::Decode { reason: format!("missing {name} header") })
}

#[cfg(test)]
mod tests {
    use orderflow_core::{Channel, OrderId};

    use super::*;

    fn envelope() -> DeadLetterEnvelope {
        DeadLetterEnvelope {
            order: Order::new(OrderId::new("1005").unwrap(), "Item3", 33.3).unwrap(),
            error_message: "temporary processing failure for order 1005".to_string(),
            retry_attempts: 3,
            dead_lettered_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        }
    }

    fn inbound(outbound: OutboundMessage) -> InboundMessage {
        InboundMessage {
            channel: Channel::DeadLetter,
            offset: 0,
            key: outbound.key,
            payload: outbound.payload,
            headers: outbound.headers,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn message_keeps_original_headers_and_adds_metadata() {
        let envelope = envelope();
        let payload = codec::encode(&envelope.order).unwrap();
        let mut original = Headers::new();
        original.insert("content-type".to_string(), "application/avro".to_string());
        original.insert("retry-attempt".to_string(), "3".to_string());

        let message = envelope.to_message(payload.clone(), &original);

        assert_eq!(message.key.as_ref(), b"1005");
        assert_eq!(message.payload, payload);
        assert_eq!(message.headers["content-type"], "application/avro");
        assert_eq!(message.headers["retry-attempt"], "3");
        assert_eq!(message.headers["retry-attempts"], "3");
        assert_eq!(message.headers["dlq-timestamp"], "1700000000123");
        assert_eq!(
            message.headers["error-message"],
            "temporary processing failure for order 1005"
        );
    }

    #[test]
    fn envelope_parses_back_from_message() {
        let envelope = envelope();
        let payload = codec::encode(&envelope.order).unwrap();
        let message = inbound(envelope.to_message(payload, &Headers::new()));

        assert_eq!(DeadLetterEnvelope::from_message(&message).unwrap(), envelope);
    }

    #[test]
    fn missing_metadata_is_rejected() {
        let envelope = envelope();
        let payload = codec::encode(&envelope.order).unwrap();
        let mut message = inbound(envelope.to_message(payload, &Headers::new()));
        message.headers.remove("retry-attempts");

        let err = DeadLetterEnvelope::from_message(&message).unwrap_err();
        assert_eq!(err.to_string(), "undecodable payload: missing retry-attempts header");
    }
}
