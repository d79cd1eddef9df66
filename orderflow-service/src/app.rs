//! Service assembly: topics, consumers and the HTTP listener.

use crate::config::ServiceConfig;
use crate::http;
use axum::Router;
use orderflow::config::TopicsConfig;
use orderflow::errors::ChannelResult;
use orderflow::pipeline::{OrderPipeline, PipelineStats};
use orderflow_memory::InMemoryBroker;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Partitions provisioned for every topic.
pub const PARTITIONS_PER_TOPIC: u32 = 1;

/// Creates the input, output and dead-letter topics.
pub fn provision_topics(broker: &InMemoryBroker, topics: &TopicsConfig) -> ChannelResult<()> {
    for topic in [&topics.input, &topics.processed, &topics.dead_letter] {
        broker.ensure_topic(topic, PARTITIONS_PER_TOPIC)?;
    }
    Ok(())
}

/// The order service running on an in-memory broker.
pub struct Service {
    config: ServiceConfig,
    broker: InMemoryBroker,
    pipeline: OrderPipeline,
}

impl Service {
    /// Provisions topics and wires the pipeline.
    pub fn new(config: ServiceConfig) -> ChannelResult<Self> {
        let broker = InMemoryBroker::new();
        provision_topics(&broker, &config.pipeline.topics)?;
        let pipeline = OrderPipeline::new(config.pipeline.clone(), Arc::new(broker.clone()));
        Ok(Self {
            config,
            broker,
            pipeline,
        })
    }

    /// Replaces the pipeline, keeping the broker.
    #[must_use]
    pub fn with_pipeline<F>(mut self, customize: F) -> Self
    where
        F: FnOnce(OrderPipeline) -> OrderPipeline,
    {
        self.pipeline = customize(self.pipeline);
        self
    }

    /// The broker backing the service.
    pub const fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// The HTTP ingress router.
    pub fn router(&self) -> Router {
        http::router(self.pipeline.ingress())
    }

    /// Serves HTTP on `listener` and runs the consumers until `shutdown` resolves.
    ///
    /// The HTTP server stops accepting requests first, then the consumers are
    /// stopped and their counters returned.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> anyhow::Result<PipelineStats>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let topics = &self.config.pipeline.topics;
        let orders = self
            .broker
            .consumer(&topics.input, &self.config.pipeline.order_group)?;
        let dead_letters = self
            .broker
            .consumer(&topics.dead_letter, &self.config.pipeline.dead_letter_group)?;

        let cancel = CancellationToken::new();
        let running = self
            .pipeline
            .start(Arc::new(orders), Arc::new(dead_letters), &cancel)?;

        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                shutdown.await;
                info!("shutdown requested");
                cancel.cancel();
            }
        });

        info!(addr = %listener.local_addr()?, "http ingress listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .await?;

        Ok(running.shutdown().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use orderflow::config::PipelineConfig;
    use orderflow::{Order, OrderStatus};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    fn deterministic() -> ServiceConfig {
        ServiceConfig {
            pipeline: PipelineConfig::deterministic(),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn topics_are_provisioned_once() {
        let service = Service::new(deterministic()).unwrap();
        let topics = TopicsConfig::default();

        for topic in [&topics.input, &topics.processed, &topics.dead_letter] {
            assert_eq!(service.broker().partition_count(topic), Ok(PARTITIONS_PER_TOPIC));
        }
        assert!(provision_topics(service.broker(), &topics).is_ok());
    }

    #[tokio::test]
    async fn submitted_order_flows_to_processed_topic() {
        let service = Service::new(deterministic()).unwrap();
        let broker = service.broker().clone();
        let router = service.router();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let server = tokio::spawn(service.run(listener, async {
            let _ = stopped.await;
        }));

        let request = Request::post("/api/orders")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"id":"O1","customerId":"C1","items":["A"],"totalAmount":50.0}"#,
            ))
            .unwrap();
        router.oneshot(request).await.unwrap();

        let processed = TopicsConfig::default().processed;
        assert!(broker.wait_for(&processed, 1, Duration::from_secs(5)).await);
        let order = Order::from_json(&broker.records(&processed)[0].payload).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);

        stop.send(()).unwrap();
        let stats = server.await.unwrap().unwrap();
        assert_eq!(stats.orders.acknowledged, 1);
        assert_eq!(stats.orders.dead_lettered, 0);
    }
}
