//! Core domain types for the orderflow pipeline.
//!
//! Provides the order record and its identifiers, the binary schema codec
//! shared by producers and consumers, the channel abstraction that the
//! emitter and orchestrator publish to and subscribe from, and the clock
//! abstraction used for deterministic testing of time-dependent behavior.
//!
//! # Data Flow
//!
//! ```text
//! ┌─────────┐  encode  ┌─────────┐        ┌──────────────┐
//! │ Emitter │ ───────▶ │ orders  │ ─────▶ │ Orchestrator │
//! └─────────┘          └─────────┘        └──────────────┘
//!                           ▲                 │      │
//!                           │  orders-retry   │      │ orders-dlq
//!                           └─────────────────┘      ▼
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod channel;
pub mod codec;
pub mod error;
pub mod models;
pub mod time;

pub use channel::{
    Channel, ChannelNames, ChannelSpec, InMemoryBroker, InboundMessage, OutboundMessage,
    StartPosition, Subscription, Transport, DEFAULT_RETENTION,
};
pub use codec::{decode, encode, encode_value, order_from_value, ORDER_SCHEMA};
pub use error::{CodecError, TransportError};
pub use models::{headers, Headers, Order, OrderId, CONTENT_TYPE_AVRO};
pub use time::{Clock, RealClock, TestClock};

/// Milliseconds since the UNIX epoch for the clock's current system time.
///
/// Used for every timestamp header the pipeline writes.
pub fn epoch_millis(clock: &dyn Clock) -> i64 {
    chrono::DateTime::<chrono::Utc>::from(clock.now_system()).timestamp_millis()
}
