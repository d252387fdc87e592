//! Channel abstraction over the message transport.
//!
//! Names the three logical channels the pipeline uses and defines the
//! [`Transport`] seam that producers and consumers talk to. The transport
//! owns durability and delivery; callers only publish keyed messages and
//! consume a lazy stream of inbound messages.
//!
//! [`InMemoryBroker`] is the bundled transport. It keeps an append-only log
//! per channel and fans new messages out to live subscribers, which is
//! enough to run the whole pipeline in one process and to drive it
//! deterministically from tests. Each log retains at most
//! [`DEFAULT_RETENTION`] messages unless configured otherwise; older
//! messages are evicted and no longer replayed.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{error::TransportError, models::Headers};

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Messages retained per channel by [`InMemoryBroker`].
pub const DEFAULT_RETENTION: usize = 10_000;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// The logical channels of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Fresh orders from the emitter.
    Primary,
    /// Orders re-published after a failed processing attempt.
    Retry,
    /// Orders that exhausted their retry budget.
    DeadLetter,
}

impl Channel {
    /// All channels, in pipeline order.
    pub const ALL: [Channel; 3] = [Channel::Primary, Channel::Retry, Channel::DeadLetter];

    /// Channels the orchestrator consumes from.
    pub const INBOUND: [Channel; 2] = [Channel::Primary, Channel::Retry];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Retry => write!(f, "retry"),
            Self::DeadLetter => write!(f, "dead-letter"),
        }
    }
}

/// Topic names backing each channel on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNames {
    /// Topic for [`Channel::Primary`].
    pub primary: String,
    /// Topic for [`Channel::Retry`].
    pub retry: String,
    /// Topic for [`Channel::DeadLetter`].
    pub dead_letter: String,
}

impl ChannelNames {
    /// Returns the topic name for a channel.
    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Primary => &self.primary,
            Channel::Retry => &self.retry,
            Channel::DeadLetter => &self.dead_letter,
        }
    }
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            primary: "orders".to_string(),
            retry: "orders-retry".to_string(),
            dead_letter: "orders-dlq".to_string(),
        }
    }
}

/// Creation parameters for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel to create.
    pub channel: Channel,
    /// Number of partitions.
    pub partitions: u32,
    /// Replication factor.
    pub replication_factor: u16,
}

impl ChannelSpec {
    /// Single partition, single replica: the reference deployment layout.
    pub fn single(channel: Channel) -> Self {
        Self { channel, partitions: 1, replication_factor: 1 }
    }

    /// Specs for every pipeline channel.
    pub fn all() -> Vec<Self> {
        Channel::ALL.into_iter().map(Self::single).collect()
    }
}

/// Where a new subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// Replay every message already on the channel.
    Earliest,
    /// Only receive messages published after subscribing.
    #[default]
    Latest,
}

/// A message handed to the transport for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Partition key, the order id.
    pub key: Bytes,
    /// Schema-encoded order.
    pub payload: Bytes,
    /// String headers carrying metadata.
    pub headers: Headers,
}

impl OutboundMessage {
    /// Creates an outbound message.
    pub fn new(key: impl Into<Bytes>, payload: impl Into<Bytes>, headers: Headers) -> Self {
        Self { key: key.into(), payload: payload.into(), headers }
    }
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel the message was read from.
    pub channel: Channel,
    /// Position of the message in its channel log.
    pub offset: u64,
    /// Partition key, the order id.
    pub key: Bytes,
    /// Schema-encoded order.
    pub payload: Bytes,
    /// String headers carrying metadata.
    pub headers: Headers,
    /// Append time on the transport, epoch milliseconds.
    pub timestamp_ms: i64,
}

impl InboundMessage {
    /// Returns the key as a lossy UTF-8 string for logging.
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }

    /// Returns a header value if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Lazy, unbounded stream of inbound messages.
///
/// Not restartable: once `next` returns `None` the transport has closed and
/// a new subscription must be opened.
#[derive(Debug)]
pub struct Subscription {
    channels: Vec<Channel>,
    receiver: mpsc::UnboundedReceiver<InboundMessage>,
}

impl Subscription {
    /// Creates a subscription over a receiver fed by a transport.
    pub fn new(channels: Vec<Channel>, receiver: mpsc::UnboundedReceiver<InboundMessage>) -> Self {
        Self { channels, receiver }
    }

    /// Waits for the next message; `None` once the transport has closed.
    pub async fn next(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    /// Channels this subscription reads from.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }
}

/// Message transport used by the emitter and orchestrator.
///
/// Implementations must guarantee durable, at-least-once handoff for every
/// publish that returns `Ok`. The trait is object safe so the pipeline can
/// hold it as `Arc<dyn Transport>`.
pub trait Transport: Send + Sync + 'static {
    /// Establishes the transport session.
    ///
    /// A failure here is an unrecoverable startup error.
    fn connect(&self) -> TransportFuture<'_, ()>;

    /// Creates any missing channels. Idempotent.
    ///
    /// Returns only the channels that did not exist before the call.
    fn ensure_channels<'a>(
        &'a self,
        specs: &'a [ChannelSpec],
    ) -> TransportFuture<'a, Vec<Channel>>;

    /// Publishes a message to a channel.
    fn publish(&self, channel: Channel, message: OutboundMessage) -> TransportFuture<'_, ()>;

    /// Opens a subscription over the given channels.
    fn subscribe<'a>(
        &'a self,
        channels: &'a [Channel],
        start: StartPosition,
    ) -> TransportFuture<'a, Subscription>;

    /// Releases the session. Open subscriptions drain and then end.
    fn disconnect(&self) -> TransportFuture<'_, ()>;
}

#[derive(Debug, Default)]
struct ChannelLog {
    messages: VecDeque<InboundMessage>,
    next_offset: u64,
    subscribers: Vec<mpsc::UnboundedSender<InboundMessage>>,
    failures_to_inject: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    connected: bool,
    closed: bool,
    connect_error: Option<String>,
    channels: HashMap<Channel, ChannelLog>,
}

/// In-process transport with per-channel logs and live fan-out.
///
/// Cloning shares the same broker, so the emitter, the orchestrator and a
/// test can all hold a handle to one set of channels.
///
/// Nothing is persisted. Each channel keeps only its most recent
/// `retention` messages, so memory stays bounded for a long-running process
/// but evicted messages are gone for late `Earliest` subscribers.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    names: Arc<ChannelNames>,
    retention: usize,
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates a broker using the default topic names.
    pub fn new() -> Self {
        Self::with_names(ChannelNames::default())
    }

    /// Creates a broker using the given topic names.
    pub fn with_names(names: ChannelNames) -> Self {
        Self {
            names: Arc::new(names),
            retention: DEFAULT_RETENTION,
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    /// Caps the number of messages kept per channel. Clamped to at least one.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Messages kept per channel before the oldest are evicted.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Topic names used by this broker.
    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    /// Returns a snapshot of the messages still retained on a channel.
    pub async fn messages(&self, channel: Channel) -> Vec<InboundMessage> {
        self.state
            .lock()
            .await
            .channels
            .get(&channel)
            .map(|log| log.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes the next `count` publishes to `channel` fail.
    pub async fn fail_publishes(&self, channel: Channel, count: u32) {
        let mut state = self.state.lock().await;
        state.channels.entry(channel).or_default().failures_to_inject = count;
    }

    /// Makes the next `connect()` fail with the given message.
    pub async fn fail_connect(&self, message: impl Into<String>) {
        self.state.lock().await.connect_error = Some(message.into());
    }

    /// Whether the broker currently has an open session.
    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state.connected && !state.closed
    }

    fn check_open(state: &BrokerState) -> TransportResult<()> {
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

impl Transport for InMemoryBroker {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(message) = state.connect_error.take() {
                return Err(TransportError::ConnectFailed { message });
            }
            state.connected = true;
            state.closed = false;
            debug!("in-memory broker connected");
            Ok(())
        })
    }

    fn ensure_channels<'a>(
        &'a self,
        specs: &'a [ChannelSpec],
    ) -> TransportFuture<'a, Vec<Channel>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Self::check_open(&state)?;

            let mut created = Vec::new();
            for spec in specs {
                if state.channels.contains_key(&spec.channel) {
                    continue;
                }
                state.channels.insert(spec.channel, ChannelLog::default());
                info!(
                    topic = %self.names.topic(spec.channel),
                    partitions = spec.partitions,
                    replication_factor = spec.replication_factor,
                    "created channel"
                );
                created.push(spec.channel);
            }
            Ok(created)
        })
    }

    fn publish(&self, channel: Channel, message: OutboundMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Self::check_open(&state)?;

            let log = state
                .channels
                .get_mut(&channel)
                .ok_or(TransportError::UnknownChannel { channel })?;

            if log.failures_to_inject > 0 {
                log.failures_to_inject -= 1;
                return Err(TransportError::publish_failed(channel, "injected publish failure"));
            }

            let inbound = InboundMessage {
                channel,
                offset: log.next_offset,
                key: message.key,
                payload: message.payload,
                headers: message.headers,
                timestamp_ms: Utc::now().timestamp_millis(),
            };

            log.next_offset += 1;
            log.subscribers.retain(|subscriber| subscriber.send(inbound.clone()).is_ok());
            log.messages.push_back(inbound);
            while log.messages.len() > self.retention {
                log.messages.pop_front();
            }
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        channels: &'a [Channel],
        start: StartPosition,
    ) -> TransportFuture<'a, Subscription> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Self::check_open(&state)?;

            if let Some(&missing) = channels.iter().find(|c| !state.channels.contains_key(*c)) {
                return Err(TransportError::UnknownChannel { channel: missing });
            }

            let (sender, receiver) = mpsc::unbounded_channel();
            for channel in channels {
                let Some(log) = state.channels.get_mut(channel) else {
                    continue;
                };
                if start == StartPosition::Earliest {
                    for message in &log.messages {
                        // Receiver is alive in this scope
                        let _ = sender.send(message.clone());
                    }
                }
                log.subscribers.push(sender.clone());
            }

            debug!(channels = ?channels, start = ?start, "subscription opened");
            Ok(Subscription::new(channels.to_vec(), receiver))
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.closed {
                warn!("in-memory broker disconnected twice");
                return Ok(());
            }
            state.closed = true;
            state.connected = false;
            for log in state.channels.values_mut() {
                log.subscribers.clear();
            }
            info!("in-memory broker disconnected");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result};

    use super::*;

    fn message(key: &'static str) -> OutboundMessage {
        OutboundMessage::new(
            Bytes::from_static(key.as_bytes()),
            Bytes::from_static(b"p"),
            Headers::new(),
        )
    }

    async fn connected(broker: InMemoryBroker) -> Result<InMemoryBroker> {
        broker.connect().await?;
        broker.ensure_channels(&ChannelSpec::all()).await?;
        Ok(broker)
    }

    async fn connected_broker() -> Result<InMemoryBroker> {
        connected(InMemoryBroker::new()).await
    }

    async fn next(subscription: &mut Subscription) -> Result<InboundMessage> {
        subscription.next().await.context("subscription ended early")
    }

    #[test]
    fn default_topic_names() {
        let names = ChannelNames::default();
        assert_eq!(names.topic(Channel::Primary), "orders");
        assert_eq!(names.topic(Channel::Retry), "orders-retry");
        assert_eq!(names.topic(Channel::DeadLetter), "orders-dlq");
    }

    #[tokio::test]
    async fn ensure_channels_is_idempotent() -> Result<()> {
        let broker = InMemoryBroker::new();
        broker.connect().await?;

        let created = broker.ensure_channels(&ChannelSpec::all()).await?;
        assert_eq!(created, Channel::ALL.to_vec());

        let created = broker.ensure_channels(&ChannelSpec::all()).await?;
        assert!(created.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let broker = InMemoryBroker::new();
        let result = broker.publish(Channel::Primary, message("1")).await;
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn publish_to_unknown_channel_fails() -> Result<()> {
        let broker = InMemoryBroker::new();
        broker.connect().await?;

        let result = broker.publish(Channel::Retry, message("1")).await;
        assert_eq!(result, Err(TransportError::UnknownChannel { channel: Channel::Retry }));
        Ok(())
    }

    #[tokio::test]
    async fn latest_subscription_skips_existing_messages() -> Result<()> {
        let broker = connected_broker().await?;
        broker.publish(Channel::Primary, message("old")).await?;

        let mut subscription = broker.subscribe(&[Channel::Primary], StartPosition::Latest).await?;
        broker.publish(Channel::Primary, message("new")).await?;

        let received = next(&mut subscription).await?;
        assert_eq!(received.key_lossy(), "new");
        assert_eq!(received.offset, 1);
        Ok(())
    }

    #[tokio::test]
    async fn earliest_subscription_replays_log() -> Result<()> {
        let broker = connected_broker().await?;
        broker.publish(Channel::Primary, message("a")).await?;
        broker.publish(Channel::Primary, message("b")).await?;

        let mut subscription =
            broker.subscribe(&[Channel::Primary], StartPosition::Earliest).await?;

        assert_eq!(next(&mut subscription).await?.key_lossy(), "a");
        assert_eq!(next(&mut subscription).await?.key_lossy(), "b");
        Ok(())
    }

    #[tokio::test]
    async fn subscription_merges_channels() -> Result<()> {
        let broker = connected_broker().await?;
        let mut subscription = broker.subscribe(&Channel::INBOUND, StartPosition::Latest).await?;

        broker.publish(Channel::Retry, message("r")).await?;
        broker.publish(Channel::DeadLetter, message("d")).await?;
        broker.publish(Channel::Primary, message("p")).await?;

        let first = next(&mut subscription).await?;
        let second = next(&mut subscription).await?;
        assert_eq!((first.channel, first.key_lossy().as_str()), (Channel::Retry, "r"));
        assert_eq!((second.channel, second.key_lossy().as_str()), (Channel::Primary, "p"));
        Ok(())
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() -> Result<()> {
        let broker = connected_broker().await?;
        broker.fail_publishes(Channel::DeadLetter, 1).await;

        assert!(broker.publish(Channel::DeadLetter, message("1")).await.is_err());
        broker.publish(Channel::DeadLetter, message("1")).await?;
        assert_eq!(broker.messages(Channel::DeadLetter).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn retention_evicts_oldest_messages() -> Result<()> {
        let broker = connected(InMemoryBroker::new().with_retention(2)).await?;
        for key in ["a", "b", "c"] {
            broker.publish(Channel::Primary, message(key)).await?;
        }

        let retained = broker.messages(Channel::Primary).await;
        let keys: Vec<_> = retained.iter().map(InboundMessage::key_lossy).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(retained.iter().map(|m| m.offset).collect::<Vec<_>>(), vec![1, 2]);

        let mut subscription =
            broker.subscribe(&[Channel::Primary], StartPosition::Earliest).await?;
        assert_eq!(next(&mut subscription).await?.key_lossy(), "b");
        Ok(())
    }

    #[test]
    fn retention_defaults_and_is_at_least_one() {
        assert_eq!(InMemoryBroker::default().retention(), DEFAULT_RETENTION);
        assert_eq!(InMemoryBroker::new().with_retention(0).retention(), 1);
    }

    #[tokio::test]
    async fn disconnect_ends_subscriptions() -> Result<()> {
        let broker = connected_broker().await?;
        let mut subscription = broker.subscribe(&[Channel::Primary], StartPosition::Latest).await?;
        broker.publish(Channel::Primary, message("last")).await?;

        broker.disconnect().await?;

        assert_eq!(next(&mut subscription).await?.key_lossy(), "last");
        assert!(subscription.next().await.is_none());
        assert_eq!(
            broker.publish(Channel::Primary, message("late")).await,
            Err(TransportError::Closed)
        );
        Ok(())
    }

    #[tokio::test]
    async fn injected_connect_failure() {
        let broker = InMemoryBroker::new();
        broker.fail_connect("no brokers reachable").await;

        let result = broker.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
        assert!(!broker.is_connected().await);
    }
}
