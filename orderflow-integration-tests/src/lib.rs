//! Integration tests for `orderflow`
//!
//! This crate runs the whole pipeline (ingress, order consumer, redelivery,
//! dead-letter routing and the dead-letter sink) against the in-memory
//! broker. [`Harness`] holds the shared setup.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use orderflow::config::{PipelineConfig, TopicsConfig};
use orderflow::errors::ChannelResult;
use orderflow::messaging::{ConsumedMessage, MessageProducer, OutboundMessage, RecordMetadata};
use orderflow::testing::doubles::RecordingReporter;
use orderflow::types::MessageCoordinates;
use orderflow::{Order, OrderPipeline, RunningPipeline};
use orderflow_memory::InMemoryBroker;
use tokio_util::sync::CancellationToken;

/// A broker with the pipeline topics provisioned.
pub struct Harness {
    /// The broker shared by every pipeline started from this harness.
    pub broker: InMemoryBroker,
    /// Pipeline configuration.
    pub config: PipelineConfig,
    /// Collects what the dead-letter sink reports.
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    /// Deterministic configuration with single-partition topics.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Deterministic configuration with `partitions` partitions per topic.
    pub fn with_partitions(partitions: u32) -> Self {
        Self::with_config(PipelineConfig::deterministic(), partitions)
    }

    /// Provisions the topics of `config`.
    pub fn with_config(config: PipelineConfig, partitions: u32) -> Self {
        let broker = InMemoryBroker::new();
        for topic in [
            &config.topics.input,
            &config.topics.processed,
            &config.topics.dead_letter,
        ] {
            broker
                .create_topic(topic, partitions)
                .unwrap_or_else(|e| panic!("cannot create {topic}: {e}"));
        }
        Self {
            broker,
            config,
            reporter: Arc::new(RecordingReporter::new()),
        }
    }

    /// Topic names in use.
    pub const fn topics(&self) -> &TopicsConfig {
        &self.config.topics
    }

    /// A pipeline publishing to this broker and reporting to [`Self::reporter`].
    pub fn pipeline(&self) -> OrderPipeline {
        OrderPipeline::new(self.config.clone(), Arc::new(self.broker.clone()))
            .with_reporter(self.reporter.clone())
    }

    /// Starts `pipeline` on consumers of this broker.
    pub fn start(&self, pipeline: &OrderPipeline, cancel: &CancellationToken) -> RunningPipeline {
        let orders = self
            .broker
            .consumer(&self.topics().input, &self.config.order_group)
            .unwrap_or_else(|e| panic!("cannot open order consumer: {e}"));
        let dead_letters = self
            .broker
            .consumer(&self.topics().dead_letter, &self.config.dead_letter_group)
            .unwrap_or_else(|e| panic!("cannot open dead-letter consumer: {e}"));
        pipeline
            .start(Arc::new(orders), Arc::new(dead_letters), cancel)
            .unwrap_or_else(|e| panic!("cannot start pipeline: {e}"))
    }

    /// Publishes an order through the ingress.
    pub async fn submit(&self, pipeline: &OrderPipeline, order: Order) -> RecordMetadata {
        pipeline
            .ingress()
            .submit(order)
            .await
            .unwrap_or_else(|e| panic!("cannot submit order: {e}"))
    }

    /// Publishes an arbitrary payload to the input topic.
    pub async fn submit_raw(&self, key: &str, payload: &[u8]) -> ChannelResult<RecordMetadata> {
        self.broker
            .send(OutboundMessage::keyed(
                self.topics().input.clone(),
                key,
                payload.to_vec(),
            ))
            .await
    }

    /// Orders published to the processed topic.
    pub fn processed(&self) -> Vec<Order> {
        self.broker
            .records(&self.topics().processed)
            .iter()
            .filter_map(|record| Order::from_json(&record.payload).ok())
            .collect()
    }

    /// Records on the dead-letter topic.
    pub fn dead_letters(&self) -> Vec<ConsumedMessage> {
        self.broker.records(&self.topics().dead_letter)
    }

    /// Input records acknowledged by the order consumer group.
    pub fn acknowledged_orders(&self) -> Vec<MessageCoordinates> {
        self.broker
            .committed(&self.topics().input, &self.config.order_group)
    }
}

/// Polls `condition` every 10ms until it holds or `within` elapses.
///
/// Returns whether the condition was met.
pub async fn eventually<F>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool + Send,
{
    let deadline = tokio::time::Instant::now() + within;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
