//! Wiring of the order pipeline.
//!
//! [`OrderPipeline`] assembles the processing state machine, the redelivery
//! error handler, the dead-letter router and the dead-letter sink from one
//! [`PipelineConfig`] and starts their consumers on the given sources.

use crate::classifier::FailureClassifier;
use crate::config::PipelineConfig;
use crate::consumer::{ErrorHandling, RedeliveryConfig, WorkerGroup, WorkerStats};
use crate::dead_letter::DeadLetterRouter;
use crate::errors::ChannelResult;
use crate::fulfillment::{Fulfillment, SimulatedFulfillment};
use crate::ingress::OrderIngress;
use crate::messaging::{MessageProducer, MessageSource};
use crate::processor::OrderProcessor;
use crate::retry::BackoffPolicy;
use crate::sink::{DeadLetterReporter, DeadLetterSink, TracingReporter};
use crate::stock::{SimulatedStockChecker, StockChecker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builds and starts the consumers of the order pipeline.
#[derive(Clone)]
pub struct OrderPipeline {
    config: PipelineConfig,
    producer: Arc<dyn MessageProducer>,
    stock: Arc<dyn StockChecker>,
    fulfillment: Arc<dyn Fulfillment>,
    reporter: Arc<dyn DeadLetterReporter>,
}

impl OrderPipeline {
    /// Creates a pipeline with the simulated dependencies described by `config`.
    pub fn new(config: PipelineConfig, producer: Arc<dyn MessageProducer>) -> Self {
        Self {
            stock: Arc::new(SimulatedStockChecker::from_config(&config.stock)),
            fulfillment: Arc::new(SimulatedFulfillment::new(config.fulfillment_latency)),
            reporter: Arc::new(TracingReporter),
            config,
            producer,
        }
    }

    /// Replaces the stock check.
    #[must_use]
    pub fn with_stock_checker(mut self, stock: Arc<dyn StockChecker>) -> Self {
        self.stock = stock;
        self
    }

    /// Replaces the downstream processing step.
    #[must_use]
    pub fn with_fulfillment(mut self, fulfillment: Arc<dyn Fulfillment>) -> Self {
        self.fulfillment = fulfillment;
        self
    }

    /// Replaces the dead-letter reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn DeadLetterReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The configuration in use.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Publisher for new orders.
    pub fn ingress(&self) -> OrderIngress {
        OrderIngress::new(Arc::clone(&self.producer), self.config.topics.input.clone())
    }

    /// The order processing state machine.
    pub fn processor(&self) -> OrderProcessor {
        OrderProcessor::new(
            Arc::clone(&self.stock),
            Arc::clone(&self.fulfillment),
            Arc::clone(&self.producer),
            self.config.topics.processed.clone(),
        )
    }

    /// Redelivery settings of the order consumer.
    pub fn redelivery_config(&self) -> RedeliveryConfig {
        RedeliveryConfig {
            classifier: FailureClassifier::new(self.config.unknown_failures),
            policy: BackoffPolicy::from_config(&self.config.backoff),
            router: DeadLetterRouter::new(
                Arc::clone(&self.producer),
                self.config.topics.dead_letter.clone(),
            ),
        }
    }

    /// Starts one order worker per partition of `source`.
    pub fn spawn_order_workers(
        &self,
        source: Arc<dyn MessageSource>,
        cancel: &CancellationToken,
    ) -> ChannelResult<WorkerGroup> {
        if source.topic() != &self.config.topics.input {
            warn!(topic = %source.topic(), expected = %self.config.topics.input, "order source reads an unexpected topic");
        }
        WorkerGroup::spawn(
            self.config.order_group.to_string(),
            source,
            Arc::new(self.processor()),
            &ErrorHandling::Redeliver(self.redelivery_config()),
            cancel,
        )
    }

    /// Starts one dead-letter sink worker per partition of `source`.
    ///
    /// The sink has no redelivery error handler.
    pub fn spawn_dead_letter_workers(
        &self,
        source: Arc<dyn MessageSource>,
        cancel: &CancellationToken,
    ) -> ChannelResult<WorkerGroup> {
        if source.topic() != &self.config.topics.dead_letter {
            warn!(topic = %source.topic(), expected = %self.config.topics.dead_letter, "dead-letter source reads an unexpected topic");
        }
        WorkerGroup::spawn(
            self.config.dead_letter_group.to_string(),
            source,
            Arc::new(DeadLetterSink::new(Arc::clone(&self.reporter))),
            &ErrorHandling::LogAndAcknowledge,
            cancel,
        )
    }

    /// Starts the order consumer and the dead-letter sink.
    pub fn start(
        &self,
        orders: Arc<dyn MessageSource>,
        dead_letters: Arc<dyn MessageSource>,
        cancel: &CancellationToken,
    ) -> ChannelResult<RunningPipeline> {
        let orders = self.spawn_order_workers(orders, cancel)?;
        let dead_letters = self.spawn_dead_letter_workers(dead_letters, cancel)?;
        info!(
            order_workers = orders.len(),
            dead_letter_workers = dead_letters.len(),
            "pipeline started"
        );
        Ok(RunningPipeline {
            orders,
            dead_letters,
        })
    }
}

/// Counters of a stopped pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Order consumer counters.
    pub orders: WorkerStats,
    /// Dead-letter sink counters.
    pub dead_letters: WorkerStats,
}

/// Consumers started by [`OrderPipeline::start`].
pub struct RunningPipeline {
    orders: WorkerGroup,
    dead_letters: WorkerGroup,
}

impl RunningPipeline {
    /// Stops all consumers, the order consumer first.
    pub async fn shutdown(self) -> PipelineStats {
        let orders = self.orders.shutdown().await;
        let dead_letters = self.dead_letters.shutdown().await;
        PipelineStats {
            orders,
            dead_letters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::ImmediateFulfillment;
    use crate::stock::AlwaysInStock;
    use crate::testing::builders::{MessageBuilder, OrderBuilder};
    use crate::testing::doubles::{RecordingProducer, RecordingReporter, ScriptedSource};
    use crate::types::TopicName;
    use std::time::Duration;

    fn pipeline(producer: Arc<RecordingProducer>) -> OrderPipeline {
        OrderPipeline::new(PipelineConfig::deterministic(), producer)
            .with_stock_checker(Arc::new(AlwaysInStock))
            .with_fulfillment(Arc::new(ImmediateFulfillment))
    }

    #[test]
    fn redelivery_settings_follow_configuration() {
        let pipeline = pipeline(Arc::new(RecordingProducer::new()));
        let settings = pipeline.redelivery_config();

        assert_eq!(settings.policy.max_attempts(), 3);
        assert_eq!(settings.policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(settings.router.topic().as_ref(), "orders-dlq");
    }

    #[tokio::test]
    async fn ingress_publishes_to_input_topic() {
        let producer = Arc::new(RecordingProducer::new());
        pipeline(producer.clone())
            .ingress()
            .submit(OrderBuilder::new().build())
            .await
            .unwrap();

        assert_eq!(producer.sent()[0].topic.as_ref(), "orders-input");
    }

    #[tokio::test(start_paused = true)]
    async fn started_pipeline_processes_and_reports() {
        let producer = Arc::new(RecordingProducer::new());
        let reporter = Arc::new(RecordingReporter::new());
        let pipeline = pipeline(producer.clone()).with_reporter(reporter.clone());

        let valid = OrderBuilder::new().id("O1").build();
        let orders = Arc::new(ScriptedSource::new([MessageBuilder::for_order(&valid).build()]));
        let dead_letters = Arc::new(ScriptedSource::new([MessageBuilder::new()
            .topic(TopicName::try_new("orders-dlq").unwrap())
            .build()]));
        let cancel = CancellationToken::new();

        let running = pipeline
            .start(orders.clone(), dead_letters.clone(), &cancel)
            .unwrap();
        orders.wait_until_drained().await;
        dead_letters.wait_until_drained().await;
        let stats = running.shutdown().await;

        assert_eq!(stats.orders.acknowledged, 1);
        assert_eq!(stats.dead_letters.acknowledged, 1);
        assert_eq!(reporter.reports().len(), 1);
        assert_eq!(producer.sent()[0].topic.as_ref(), "orders-processed");
    }
}
