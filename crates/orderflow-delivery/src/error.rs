//! Error types for order delivery operations.
//!
//! Every error the orchestrator can encounter is classified here, and each
//! class maps to exactly one routing decision: retry, dead-letter, or log
//! and drop. None of them escape the consumption loop.

use std::{fmt, time::Duration};

use orderflow_core::{Channel, CodecError, OrderId, TransportError};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error taxonomy for the delivery pipeline.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Record does not conform to the order schema at encode time.
    #[error("schema violation on field `{field}`: {reason}")]
    SchemaViolation {
        /// Offending field
        field: String,
        /// Description of the violation
        reason: String,
    },

    /// Inbound bytes could not be parsed into an order.
    #[error("undecodable payload: {reason}")]
    Decode {
        /// Description of the decode failure
        reason: String,
    },

    /// Processing failed in a way that may succeed on a later attempt.
    #[error("temporary processing failure for order {order_id}")]
    TransientProcessingFailure {
        /// Order whose processing failed
        order_id: OrderId,
    },

    /// Publishing to or subscribing from a channel failed.
    #[error("transport failure on {channel}: {message}")]
    Transport {
        /// Channel involved in the failed call
        channel: Channel,
        /// Transport error message
        message: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Pending retry publications did not finish within the shutdown window.
    #[error("shutdown timed out after {timeout:?} with {abandoned} pending retries")]
    ShutdownTimeout {
        /// Grace period that elapsed
        timeout: Duration,
        /// Retry publications still pending when the window closed
        abandoned: usize,
    },
}

impl DeliveryError {
    /// Creates a transient processing failure.
    pub fn transient(order_id: OrderId) -> Self {
        Self::TransientProcessingFailure { order_id }
    }

    /// Creates a transport error for the given channel.
    pub fn transport(channel: Channel, error: &TransportError) -> Self {
        Self::Transport { channel, message: error.to_string() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether the failed order should be routed through the retry channel.
    ///
    /// Only processing failures are retried. Decode failures cannot be keyed
    /// reliably, schema violations are caller bugs, and transport failures
    /// are left to the transport's own retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientProcessingFailure { .. } => true,

            Self::SchemaViolation { .. }
            | Self::Decode { .. }
            | Self::Transport { .. }
            | Self::Configuration { .. }
            | Self::ShutdownTimeout { .. } => false,
        }
    }
}

impl From<CodecError> for DeliveryError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::SchemaViolation { field, reason } => {
                Self::SchemaViolation { field, reason }
            },
            CodecError::Decode { reason } => Self::Decode { reason },
        }
    }
}

/// Category of delivery error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Schema and decode problems.
    Schema,
    /// Processing failures.
    Processing,
    /// Channel transport problems.
    Transport,
    /// Configuration and lifecycle problems.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::SchemaViolation { .. } | DeliveryError::Decode { .. } => Self::Schema,
            DeliveryError::TransientProcessingFailure { .. } => Self::Processing,
            DeliveryError::Transport { .. } => Self::Transport,
            DeliveryError::Configuration { .. } | DeliveryError::ShutdownTimeout { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::Processing => write!(f, "processing"),
            Self::Transport => write!(f, "transport"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_id() -> OrderId {
        OrderId::new("1001").unwrap()
    }

    #[test]
    fn only_processing_failures_are_retryable() {
        assert!(DeliveryError::transient(order_id()).is_retryable());

        assert!(!DeliveryError::from(CodecError::decode("truncated")).is_retryable());
        assert!(!DeliveryError::from(CodecError::schema_violation("price", "negative"))
            .is_retryable());
        assert!(!DeliveryError::transport(Channel::Retry, &TransportError::Closed).is_retryable());
        assert!(!DeliveryError::configuration("bad").is_retryable());
    }

    #[test]
    fn codec_errors_map_to_matching_variants() {
        let error = DeliveryError::from(CodecError::schema_violation("orderId", "empty"));
        assert!(matches!(
            error,
            DeliveryError::SchemaViolation { ref field, .. } if field == "orderId"
        ));

        let error = DeliveryError::from(CodecError::decode("bad varint"));
        assert_eq!(error.to_string(), "undecodable payload: bad varint");
    }

    #[test]
    fn transient_failure_message_names_order() {
        let error = DeliveryError::transient(order_id());
        assert_eq!(error.to_string(), "temporary processing failure for order 1001");
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(
            ErrorCategory::from(&DeliveryError::transient(order_id())),
            ErrorCategory::Processing
        );
        let transport = DeliveryError::transport(Channel::DeadLetter, &TransportError::Closed);
        assert_eq!(ErrorCategory::from(&transport), ErrorCategory::Transport);
        assert_eq!(ErrorCategory::Schema.to_string(), "schema");
    }
}
