//! Order submission.
//!
//! Publishes orders onto the input channel, keyed by order id so that all
//! deliveries of one order land on the same partition.

use crate::errors::ChannelResult;
use crate::messaging::{MessageProducer, OutboundMessage, RecordMetadata};
use crate::order::Order;
use crate::types::{epoch_millis_now, TopicName};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Acknowledgement text returned for a submitted order.
pub const ORDER_SENT: &str = "Order sent!";
/// Acknowledgement text returned for a generated order.
pub const RANDOM_ORDER_SENT: &str = "Random order generated and sent!";

/// Publishes orders to the input channel.
#[derive(Clone)]
pub struct OrderIngress {
    producer: Arc<dyn MessageProducer>,
    topic: TopicName,
}

impl OrderIngress {
    /// Creates an ingress publishing to `topic`.
    pub fn new(producer: Arc<dyn MessageProducer>, topic: TopicName) -> Self {
        Self { producer, topic }
    }

    /// Stamps and publishes an order.
    ///
    /// The order is not validated here; invalid orders are rejected by the
    /// consumer and end up on the dead-letter channel.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn submit(&self, mut order: Order) -> ChannelResult<RecordMetadata> {
        order.timestamp = epoch_millis_now();
        let payload = order.to_json()?;
        let message = OutboundMessage::keyed(self.topic.clone(), order.message_key(), payload);

        match self.producer.send(message).await {
            Ok(metadata) => {
                info!(
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    "order sent"
                );
                Ok(metadata)
            }
            Err(e) => {
                error!(error = %e, "failed to send order");
                Err(e)
            }
        }
    }

    /// Generates a random valid order and publishes it.
    pub async fn generate(&self) -> ChannelResult<Order> {
        let order = Order::random();
        self.submit(order.clone()).await?;
        Ok(order)
    }
}
