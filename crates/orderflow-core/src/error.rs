//! Error types for schema encoding and channel transport.
//!
//! Codec errors split into encode-time schema violations, which are fatal to
//! the caller, and decode failures, which mark inbound bytes as untrustworthy.
//! Transport errors cover every way a publish or subscribe call can fail.

use thiserror::Error;

use crate::channel::Channel;

/// Errors raised while encoding or decoding order records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The record does not conform to the order schema.
    #[error("schema violation on field `{field}`: {reason}")]
    SchemaViolation {
        /// Name of the offending field as it appears in the schema
        field: String,
        /// Human readable description of the violation
        reason: String,
    },

    /// Inbound bytes could not be parsed as an order record.
    #[error("failed to decode order: {reason}")]
    Decode {
        /// Description of where decoding went wrong
        reason: String,
    },
}

impl CodecError {
    /// Creates a schema violation for the given field.
    pub fn schema_violation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation { field: field.into(), reason: reason.into() }
    }

    /// Creates a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode { reason: reason.into() }
    }
}

/// Errors raised by a channel transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport session could not be established.
    #[error("failed to connect to transport: {message}")]
    ConnectFailed {
        /// Reason reported by the transport
        message: String,
    },

    /// An operation was attempted before `connect()`.
    #[error("transport is not connected")]
    NotConnected,

    /// The transport has been disconnected.
    #[error("transport is closed")]
    Closed,

    /// The transport refused or lost a publish.
    #[error("publish to {channel} failed: {message}")]
    PublishFailed {
        /// Channel the publish targeted
        channel: Channel,
        /// Reason reported by the transport
        message: String,
    },

    /// The channel has not been created on the transport.
    #[error("unknown channel {channel}")]
    UnknownChannel {
        /// Channel that was not found
        channel: Channel,
    },
}

impl TransportError {
    /// Creates a publish failure for the given channel.
    pub fn publish_failed(channel: Channel, message: impl Into<String>) -> Self {
        Self::PublishFailed { channel, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_display_format() {
        let error = CodecError::schema_violation("price", "must be non-negative");
        assert_eq!(error.to_string(), "schema violation on field `price`: must be non-negative");

        let error = CodecError::decode("unexpected end of input");
        assert_eq!(error.to_string(), "failed to decode order: unexpected end of input");
    }

    #[test]
    fn transport_error_names_channel() {
        let error = TransportError::publish_failed(Channel::DeadLetter, "broker unavailable");
        assert_eq!(error.to_string(), "publish to dead-letter failed: broker unavailable");
    }
}
