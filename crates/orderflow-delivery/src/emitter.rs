//! Order emitter: generates orders on a fixed cadence and publishes them to
//! the primary channel.
//!
//! Generation is separated from publication. [`OrderGenerator`] is pure and
//! deterministic when seeded, so tests can predict every record it yields,
//! while [`Emitter`] owns the transport, the clock and the cadence loop.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use orderflow_core::{
    codec, epoch_millis, headers, Channel, Clock, Headers, Order, OrderId, OutboundMessage,
    Transport, CONTENT_TYPE_AVRO,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{DeliveryError, Result};

/// First order ID handed out by a fresh generator.
pub const DEFAULT_ORDER_ID_START: u64 = 1001;

/// Products the generator picks from.
pub const PRODUCTS: [&str; 5] = ["Item1", "Item2", "Item3", "Item4", "Item5"];

/// Lowest generated price in cents (inclusive).
const MIN_PRICE_CENTS: u64 = 1_000;

/// Highest generated price in cents (exclusive).
const MAX_PRICE_CENTS: u64 = 11_000;

/// Produces synthetic orders with sequential IDs.
#[derive(Debug)]
pub struct OrderGenerator {
    next_id: u64,
    rng: StdRng,
}

impl OrderGenerator {
    /// Creates a generator starting at `order_id_start`.
    ///
    /// With a seed the sequence of products and prices is reproducible;
    /// without one the generator draws from OS entropy.
    pub fn new(order_id_start: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { next_id: order_id_start, rng }
    }

    /// ID the next generated order will carry.
    pub fn peek_id(&self) -> u64 {
        self.next_id
    }

    /// Generates the next order and advances the counter.
    pub fn next_order(&mut self) -> Order {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        sample_order(id, &mut self.rng)
    }
}

impl Default for OrderGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER_ID_START, None)
    }
}

/// Builds one order with a random product and a price in `[10.00, 110.00)`.
///
/// Prices are drawn in whole cents so they always carry two decimals.
pub fn sample_order<R: Rng>(id: u64, rng: &mut R) -> Order {
    let product = PRODUCTS[rng.random_range(0..PRODUCTS.len())];
    let cents = rng.random_range(MIN_PRICE_CENTS..MAX_PRICE_CENTS);

    Order {
        order_id: OrderId::from_counter(id),
        product: product.to_string(),
        price: cents as f64 / 100.0,
    }
}

/// Emitter settings.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Time between emissions.
    pub emit_interval: Duration,
    /// First order ID.
    pub order_id_start: u64,
    /// Seed for reproducible products and prices.
    pub seed: Option<u64>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            emit_interval: Duration::from_secs(2),
            order_id_start: DEFAULT_ORDER_ID_START,
            seed: None,
        }
    }
}

/// Emission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    /// Orders published successfully.
    pub emitted: u64,
    /// Cycles whose publish failed.
    pub failed: u64,
}

/// Publishes orders to the primary channel.
pub struct Emitter {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: EmitterConfig,
    generator: Mutex<OrderGenerator>,
    stats: Arc<RwLock<EmitterStats>>,
}

impl Emitter {
    /// Creates an emitter publishing through `transport`.
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: EmitterConfig,
    ) -> Self {
        let generator = OrderGenerator::new(config.order_id_start, config.seed);
        Self {
            transport,
            clock,
            config,
            generator: Mutex::new(generator),
            stats: Arc::new(RwLock::new(EmitterStats::default())),
        }
    }

    /// Generates one order and publishes it.
    ///
    /// The ID counter advances even when the publish fails, so a failed
    /// cycle leaves a gap in the sequence rather than reusing the ID.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the publish fails.
    pub async fn emit_once(&self) -> Result<Order> {
        let order = self.generator.lock().await.next_order();
        let result = self.publish(order).await;

        let mut stats = self.stats.write().await;
        match &result {
            Ok(_) => stats.emitted += 1,
            Err(_) => stats.failed += 1,
        }
        result
    }

    /// Publishes an externally provided order.
    ///
    /// # Errors
    ///
    /// Returns a schema violation if the order is invalid, in which case
    /// nothing is published, or a transport error if the publish fails.
    pub async fn submit(&self, order: Order) -> Result<Order> {
        let order = self.publish(order).await?;
        self.stats.write().await.emitted += 1;
        Ok(order)
    }

    /// Validates a JSON record against the order schema and publishes it.
    ///
    /// # Errors
    ///
    /// Same as [`Emitter::submit`].
    pub async fn submit_value(&self, value: &Value) -> Result<Order> {
        let order = codec::order_from_value(value)?;
        self.submit(order).await
    }

    /// Emits an order every `emit_interval` until `cancel` fires.
    ///
    /// Ticks are scheduled from the loop's start rather than from the end of
    /// the previous publish, so publish latency does not stretch the cadence.
    /// A publish that overruns whole intervals skips the missed ticks.
    /// Publish failures are logged and the loop carries on with the next
    /// cycle.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = self.config.emit_interval;
        let first_order_id = self.generator.lock().await.peek_id();
        info!(interval_ms = interval.as_millis() as u64, first_order_id, "emitter started");

        let mut deadline = self.clock.now() + interval;
        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.clock.sleep(remaining) => {},
            }

            if let Err(e) = self.emit_once().await {
                error!(error = %e, "failed to emit order");
            }

            deadline += interval;
            let now = self.clock.now();
            if deadline <= now && !interval.is_zero() {
                let lag = now.duration_since(deadline).as_nanos() / interval.as_nanos();
                let missed = u32::try_from(lag).unwrap_or(u32::MAX).saturating_add(1);
                debug!(missed_ticks = missed, "emitter fell behind cadence");
                deadline += interval.saturating_mul(missed);
            }
        }

        let stats = self.stats().await;
        info!(emitted = stats.emitted, failed = stats.failed, "emitter stopped");
    }

    /// Current counters.
    pub async fn stats(&self) -> EmitterStats {
        *self.stats.read().await
    }

    async fn publish(&self, order: Order) -> Result<Order> {
        let payload = codec::encode(&order)?;

        let mut headers = Headers::new();
        headers.insert(headers::CONTENT_TYPE.to_string(), CONTENT_TYPE_AVRO.to_string());
        let timestamp = epoch_millis(self.clock.as_ref());
        headers.insert(headers::TIMESTAMP.to_string(), timestamp.to_string());

        let key = Bytes::copy_from_slice(order.order_id.as_bytes());
        self.transport
            .publish(Channel::Primary, OutboundMessage::new(key, payload, headers))
            .await
            .map_err(|e| DeliveryError::transport(Channel::Primary, &e))?;

        debug!(
            order_id = %order.order_id,
            product = %order.product,
            price = order.price,
            "order published"
        );
        Ok(order)
    }
}
