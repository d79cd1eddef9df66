//! Order processing state machine.
//!
//! Drives one delivery of an order through
//! `PENDING -> PROCESSING -> COMPLETED`, or to `FAILED` on any error. The
//! machine marks the failure locally and always hands the error back to its
//! caller; deciding whether to retry is the redelivery layer's job.

use crate::consumer::RecordHandler;
use crate::errors::{ProcessingError, ProcessingResult};
use crate::fulfillment::Fulfillment;
use crate::messaging::{ConsumedMessage, MessageProducer, OutboundMessage};
use crate::order::{Order, OrderStatus};
use crate::stock::StockChecker;
use crate::types::{epoch_millis_now, TopicName};
use crate::validation::OrderValidator;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Processes orders and publishes completed ones.
#[derive(Clone)]
pub struct OrderProcessor {
    validator: OrderValidator,
    stock: Arc<dyn StockChecker>,
    fulfillment: Arc<dyn Fulfillment>,
    producer: Arc<dyn MessageProducer>,
    output_topic: TopicName,
}

impl OrderProcessor {
    /// Creates a processor publishing completed orders to `output_topic`.
    pub fn new(
        stock: Arc<dyn StockChecker>,
        fulfillment: Arc<dyn Fulfillment>,
        producer: Arc<dyn MessageProducer>,
        output_topic: TopicName,
    ) -> Self {
        Self {
            validator: OrderValidator::new(),
            stock,
            fulfillment,
            producer,
            output_topic,
        }
    }

    /// Runs one delivery of `order` through the state machine.
    ///
    /// On success the order is `COMPLETED` and has been handed to the output
    /// channel. On failure it is `FAILED` and the triggering error is returned.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn process(&self, order: &mut Order) -> ProcessingResult<()> {
        if order.status == OrderStatus::Completed {
            debug!("order already completed, processing duplicate delivery");
        }

        if let Err(e) = self.run(order).await {
            order.fail();
            match &e {
                ProcessingError::Validation { reason, .. } => {
                    error!(reason = %reason, "order validation failed");
                }
                ProcessingError::StockUnavailable { item, .. } => {
                    warn!(item = %item, "stock unavailable");
                }
                other => error!(error = %other, "unexpected failure while processing order"),
            }
            return Err(e);
        }

        self.publish_processed(order).await;
        info!("order processed successfully");
        Ok(())
    }

    async fn run(&self, order: &mut Order) -> ProcessingResult<()> {
        self.validator.validate(order)?;
        debug!("validation passed");

        order.transition(OrderStatus::Processing)?;
        debug!("status changed to PROCESSING");

        self.stock.check(order).await?;
        self.fulfillment.fulfil(order).await?;

        order.complete(epoch_millis_now())?;
        debug!("status changed to COMPLETED");
        Ok(())
    }

    /// Publishes a completed order. Failures are logged and never returned.
    async fn publish_processed(&self, order: &Order) {
        let payload = match order.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to encode processed order");
                return;
            }
        };

        let message = OutboundMessage::keyed(self.output_topic.clone(), order.message_key(), payload);
        match self.producer.send(message).await {
            Ok(metadata) => debug!(
                topic = %metadata.topic,
                partition = metadata.partition,
                offset = metadata.offset,
                "processed order published"
            ),
            Err(e) => error!(
                topic = %self.output_topic,
                error = %e,
                "failed to publish processed order"
            ),
        }
    }
}

#[async_trait]
impl RecordHandler for OrderProcessor {
    #[instrument(skip(self, message), fields(coordinates = %message.coordinates))]
    async fn handle(&self, message: &ConsumedMessage) -> ProcessingResult<()> {
        let mut order = Order::from_json(&message.payload)?;
        info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            items = ?order.items,
            total_amount = %order.total_amount,
            status = %order.status,
            "order received"
        );
        self.process(&mut order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::ImmediateFulfillment;
    use crate::stock::AlwaysInStock;
    use crate::testing::builders::{MessageBuilder, OrderBuilder};
    use crate::testing::doubles::{
        FailingFulfillment, RecordingProducer, ScriptedStockChecker,
    };
    use rust_decimal_macros::dec;
    use tracing_test::traced_test;

    fn output_topic() -> TopicName {
        TopicName::try_new("orders-processed").unwrap()
    }

    fn processor(producer: Arc<RecordingProducer>) -> OrderProcessor {
        OrderProcessor::new(
            Arc::new(AlwaysInStock),
            Arc::new(ImmediateFulfillment),
            producer,
            output_topic(),
        )
    }

    #[tokio::test]
    async fn valid_order_completes_and_is_published() {
        let producer = Arc::new(RecordingProducer::new());
        let mut order = OrderBuilder::new().id("O1").timestamp(1_000).build();

        processor(producer.clone()).process(&mut order).await.unwrap();

        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.timestamp >= 1_000);

        let sent = producer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, output_topic());
        assert_eq!(sent[0].key.as_deref(), Some("O1"));
        let published = Order::from_json(&sent[0].payload).unwrap();
        assert_eq!(published, order);
    }

    #[tokio::test]
    async fn validation_failure_marks_failed_and_publishes_nothing() {
        let producer = Arc::new(RecordingProducer::new());
        let mut order = OrderBuilder::new().customer_id("").build();

        let error = processor(producer.clone()).process(&mut order).await.unwrap_err();

        assert!(matches!(error, ProcessingError::Validation { .. }));
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(producer.sent().is_empty());
    }

    #[tokio::test]
    async fn stock_failure_is_surfaced_after_marking_failed() {
        let producer = Arc::new(RecordingProducer::new());
        let stock = Arc::new(ScriptedStockChecker::failing_times(1));
        let processor = OrderProcessor::new(
            stock.clone(),
            Arc::new(ImmediateFulfillment),
            producer.clone(),
            output_topic(),
        );
        let mut order = OrderBuilder::new().id("O4").items(["X"]).build();

        let error = processor.process(&mut order).await.unwrap_err();

        assert_eq!(error, ProcessingError::stock_unavailable("O4", "X"));
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(stock.calls(), 1);
        assert!(producer.sent().is_empty());
    }

    #[tokio::test]
    async fn downstream_failure_is_surfaced_unchanged() {
        let producer = Arc::new(RecordingProducer::new());
        let processor = OrderProcessor::new(
            Arc::new(AlwaysInStock),
            Arc::new(FailingFulfillment::new("warehouse offline")),
            producer.clone(),
            output_topic(),
        );
        let mut order = OrderBuilder::new().build();

        let error = processor.process(&mut order).await.unwrap_err();

        assert_eq!(error, ProcessingError::Unexpected("warehouse offline".into()));
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_delivery_of_completed_order_is_reprocessed() {
        let producer = Arc::new(RecordingProducer::new());
        let processor = processor(producer.clone());
        let mut first = OrderBuilder::new().id("O1").build();
        processor.process(&mut first).await.unwrap();

        let mut duplicate = first.clone();
        processor.process(&mut duplicate).await.unwrap();

        assert_eq!(duplicate.status, OrderStatus::Completed);
        assert!(duplicate.timestamp >= first.timestamp);
        assert_eq!(producer.sent().len(), 2);
    }

    #[tokio::test]
    async fn inbound_processing_or_failed_status_still_completes() {
        let producer = Arc::new(RecordingProducer::new());
        let processor = processor(producer.clone());

        for status in [OrderStatus::Processing, OrderStatus::Failed] {
            let mut order = OrderBuilder::new().id("O1").build();
            order.status = status;

            processor.process(&mut order).await.unwrap();

            assert_eq!(order.status, OrderStatus::Completed, "inbound {status}");
        }
        assert_eq!(producer.sent().len(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn publish_failure_is_logged_not_returned() {
        let producer = Arc::new(RecordingProducer::failing());
        let mut order = OrderBuilder::new().build();

        let result = processor(producer).process(&mut order).await;

        assert!(result.is_ok());
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(logs_contain("failed to publish processed order"));
    }

    #[tokio::test]
    async fn handler_decodes_payload_before_processing() {
        let producer = Arc::new(RecordingProducer::new());
        let order = OrderBuilder::new().id("O1").total_amount(dec!(50.0)).build();
        let message = MessageBuilder::for_order(&order).offset(3).build();

        processor(producer.clone()).handle(&message).await.unwrap();

        let published = Order::from_json(&producer.sent()[0].payload).unwrap();
        assert_eq!(published.id, "O1");
        assert_eq!(published.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn handler_rejects_undecodable_payload() {
        let producer = Arc::new(RecordingProducer::new());
        let message = MessageBuilder::new().payload(b"{not-json".to_vec()).build();

        let error = processor(producer.clone()).handle(&message).await.unwrap_err();

        assert!(matches!(error, ProcessingError::Deserialization(_)));
        assert!(producer.sent().is_empty());
    }
}
