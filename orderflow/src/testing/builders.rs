//! Builders for test data.

use crate::config::ORDERS_INPUT_TOPIC;
use crate::messaging::ConsumedMessage;
use crate::order::{Order, OrderStatus};
use crate::types::{Headers, MessageCoordinates, TopicName};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Builds orders that are valid unless told otherwise.
///
/// ```rust,ignore
/// let order = OrderBuilder::new().id("O2").customer_id("").build();
/// ```
#[derive(Debug, Clone)]
pub struct OrderBuilder {
    order: Order,
}

impl OrderBuilder {
    /// A valid pending order `O1` for customer `C1` worth 50.00.
    pub fn new() -> Self {
        Self {
            order: Order {
                id: "O1".to_string(),
                customer_id: "C1".to_string(),
                items: vec!["Item1".to_string()],
                total_amount: dec!(50.00),
                status: OrderStatus::Pending,
                timestamp: 1_700_000_000_000,
            },
        }
    }

    /// Sets the order id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.order.id = id.into();
        self
    }

    /// Sets the customer id.
    #[must_use]
    pub fn customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.order.customer_id = customer_id.into();
        self
    }

    /// Replaces the items.
    #[must_use]
    pub fn items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order.items = items.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the total amount.
    #[must_use]
    pub const fn total_amount(mut self, amount: Decimal) -> Self {
        self.order.total_amount = amount;
        self
    }

    /// Sets the status.
    #[must_use]
    pub const fn status(mut self, status: OrderStatus) -> Self {
        self.order.status = status;
        self
    }

    /// Sets the timestamp, epoch milliseconds.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: i64) -> Self {
        self.order.timestamp = timestamp;
        self
    }

    /// Builds the order.
    pub fn build(self) -> Order {
        self.order
    }
}

impl Default for OrderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds consumed records.
///
/// Defaults to offset 0 of partition 0 of `orders-input` with an empty JSON
/// object as payload.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: ConsumedMessage,
}

impl MessageBuilder {
    /// A record with default coordinates and an empty payload.
    pub fn new() -> Self {
        Self {
            message: ConsumedMessage {
                coordinates: MessageCoordinates {
                    topic: TopicName::try_new(ORDERS_INPUT_TOPIC).expect("valid topic name"),
                    partition: 0,
                    offset: 0,
                    timestamp: 1_700_000_000_000,
                },
                key: None,
                payload: b"{}".to_vec(),
                headers: Headers::new(),
            },
        }
    }

    /// A record carrying `order` as JSON, keyed by its id.
    pub fn for_order(order: &Order) -> Self {
        let payload = order.to_json().expect("orders always encode");
        Self::new().key(order.message_key()).payload(payload)
    }

    /// Sets the topic.
    #[must_use]
    pub fn topic(mut self, topic: TopicName) -> Self {
        self.message.coordinates.topic = topic;
        self
    }

    /// Sets the partition.
    #[must_use]
    pub const fn partition(mut self, partition: u32) -> Self {
        self.message.coordinates.partition = partition;
        self
    }

    /// Sets the offset.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.message.coordinates.offset = offset;
        self
    }

    /// Sets the broker timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: i64) -> Self {
        self.message.coordinates.timestamp = timestamp;
        self
    }

    /// Sets the key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.message.key = Some(key.into());
        self
    }

    /// Sets the raw payload.
    #[must_use]
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.message.payload = payload;
        self
    }

    /// Replaces the headers.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.message.headers = headers;
        self
    }

    /// Builds the record.
    pub fn build(self) -> ConsumedMessage {
        self.message
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
