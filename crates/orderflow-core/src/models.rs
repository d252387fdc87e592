//! Order record, identifiers and message header vocabulary.
//!
//! The order is the unit of work moved through the pipeline. Its identifier
//! doubles as the channel partition key and the retry ledger key, so it is
//! wrapped in a newtype that cannot be empty.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Message headers. Ordered so rendered headers are deterministic.
pub type Headers = BTreeMap<String, String>;

/// Content type stamped on every order payload.
pub const CONTENT_TYPE_AVRO: &str = "application/avro";

/// Well-known header names.
pub mod headers {
    /// Payload content type.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Creation time of the original message, epoch milliseconds.
    pub const TIMESTAMP: &str = "timestamp";
    /// Retry attempt number carried on the retry channel (1-based).
    pub const RETRY_ATTEMPT: &str = "retry-attempt";
    /// Time the retry was published, epoch milliseconds.
    pub const RETRY_TIMESTAMP: &str = "retry-timestamp";
    /// Description of the failure that dead-lettered the message.
    pub const ERROR_MESSAGE: &str = "error-message";
    /// Time the message was dead-lettered, epoch milliseconds.
    pub const DLQ_TIMESTAMP: &str = "dlq-timestamp";
    /// Number of retries exhausted before dead-lettering.
    pub const RETRY_ATTEMPTS: &str = "retry-attempts";
}

/// Strongly-typed order identifier.
///
/// # Example
///
/// ```
/// use orderflow_core::OrderId;
///
/// let id = OrderId::new("1001").unwrap();
/// assert_eq!(id.as_str(), "1001");
/// assert!(OrderId::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    /// Creates an order identifier, rejecting empty strings.
    pub fn new(id: impl Into<String>) -> Result<Self, CodecError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CodecError::schema_violation("orderId", "must not be empty"));
        }
        Ok(Self(id))
    }

    /// Creates an identifier from a numeric counter value.
    pub fn from_counter(value: u64) -> Self {
        Self(value.to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier as raw key bytes for channel partitioning.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrderId {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

/// A single order event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique order identifier.
    pub order_id: OrderId,
    /// Opaque identifier of the purchased item.
    pub product: String,
    /// Non-negative price.
    pub price: f64,
}

impl Order {
    /// Creates an order after validating the price.
    pub fn new(
        order_id: OrderId,
        product: impl Into<String>,
        price: f64,
    ) -> Result<Self, CodecError> {
        let order = Self { order_id, product: product.into(), price };
        order.validate()?;
        Ok(order)
    }

    /// Checks the record against the schema's value constraints.
    ///
    /// Fields are public, so a record can be built without going through
    /// [`Order::new`]; the codec calls this before every encode.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.order_id.as_str().is_empty() {
            return Err(CodecError::schema_violation("orderId", "must not be empty"));
        }
        if !self.price.is_finite() {
            return Err(CodecError::schema_violation("price", "must be a finite number"));
        }
        if self.price < 0.0 {
            return Err(CodecError::schema_violation(
                "price",
                format!("must be non-negative, got {}", self.price),
            ));
        }
        Ok(())
    }

    /// Renders the price with two-decimal precision.
    pub fn display_price(&self) -> String {
        format!("{:.2}", self.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_rejects_negative_price() {
        let id = OrderId::new("1001").unwrap();
        let err = Order::new(id, "Item1", -0.01).unwrap_err();
        assert!(matches!(err, CodecError::SchemaViolation { ref field, .. } if field == "price"));
    }

    #[test]
    fn order_rejects_non_finite_price() {
        let id = OrderId::new("1001").unwrap();
        assert!(Order::new(id.clone(), "Item1", f64::NAN).is_err());
        assert!(Order::new(id, "Item1", f64::INFINITY).is_err());
    }

    #[test]
    fn price_renders_two_decimals() {
        let order = Order::new(OrderId::new("7").unwrap(), "Item3", 42.5).unwrap();
        assert_eq!(order.display_price(), "42.50");
    }

    #[test]
    fn order_id_deserialization_rejects_empty() {
        let result: Result<Order, _> =
            serde_json::from_str(r#"{"orderId":"","product":"Item1","price":1.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn order_serializes_with_schema_field_names() {
        let order = Order::new(OrderId::new("1002").unwrap(), "Item2", 10.0).unwrap();
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["orderId"], "1002");
        assert_eq!(json["product"], "Item2");
    }
}
