//! Retriable failures: exponential redelivery, recovery and exhaustion.

use std::sync::Arc;
use std::time::Duration;

use orderflow::config::{BackoffConfig, PipelineConfig};
use orderflow::dead_letter::{EXCEPTION_CLASS_HEADER, EXCEPTION_MESSAGE_HEADER};
use orderflow::fulfillment::ImmediateFulfillment;
use orderflow::testing::prelude::*;
use orderflow::{OrderStatus, UnknownFailurePolicy};
use orderflow_integration_tests::{eventually, Harness};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const WITHIN: Duration = Duration::from_secs(60);

fn gaps(times: &[tokio::time::Instant]) -> Vec<Duration> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn stock_failure_recovers_on_second_attempt() {
    let harness = Harness::new();
    let stock = Arc::new(ScriptedStockChecker::failing_times(1));
    let pipeline = harness.pipeline().with_stock_checker(stock.clone());
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O1").build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().processed, 1, WITHIN).await);
    assert!(eventually(WITHIN, || harness.acknowledged_orders().len() == 1).await);
    let stats = running.shutdown().await;

    assert_eq!(stock.calls(), 2);
    let gap = gaps(&stock.call_times())[0];
    assert!(gap >= Duration::from_millis(1000), "redelivered after {gap:?}");
    assert!(gap < Duration::from_millis(1100), "redelivered after {gap:?}");
    assert_eq!(harness.processed()[0].status, OrderStatus::Completed);
    assert!(harness.dead_letters().is_empty());
    assert_eq!(stats.orders.redeliveries, 1);
    assert_eq!(stats.orders.dead_lettered, 0);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn each_failed_attempt_is_logged_before_redelivery() {
    let harness = Harness::new();
    let stock = Arc::new(ScriptedStockChecker::failing_times(2));
    let pipeline = harness.pipeline().with_stock_checker(stock.clone());
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O1").build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().processed, 1, WITHIN).await);
    running.shutdown().await;

    assert!(logs_contain("delivery attempt failed, redelivering"));
    assert!(logs_contain("attempt=1"));
    assert!(logs_contain("attempt=2"));
    assert!(logs_contain("delay_ms=2000"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_stock_failure_is_dead_lettered_after_backoff() {
    let harness = Harness::new();
    let stock = Arc::new(ScriptedStockChecker::always_failing());
    let pipeline = harness.pipeline().with_stock_checker(stock.clone());
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O1").items(["Widget"]).build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().dead_letter, 1, WITHIN).await);
    assert!(eventually(WITHIN, || harness.acknowledged_orders().len() == 1).await);
    let stats = running.shutdown().await;

    assert_eq!(stock.calls(), 3);
    let gaps = gaps(&stock.call_times());
    assert!(gaps[0] >= Duration::from_secs(1) && gaps[0] < Duration::from_millis(1100));
    assert!(gaps[1] >= Duration::from_secs(2) && gaps[1] < Duration::from_millis(2100));

    let dead = &harness.dead_letters()[0];
    assert_eq!(
        dead.headers.last(EXCEPTION_CLASS_HEADER),
        Some("StockUnavailableError")
    );
    assert_eq!(
        dead.headers.last(EXCEPTION_MESSAGE_HEADER),
        Some("Stock unavailable for order O1, item: Widget")
    );
    assert!(harness.processed().is_empty());
    assert_eq!(stats.orders.redeliveries, 2);
    assert_eq!(stats.orders.dead_lettered, 1);
    assert_eq!(stats.orders.acknowledged, 1);
}

#[tokio::test(start_paused = true)]
async fn configured_backoff_is_honoured() {
    let config = PipelineConfig {
        backoff: BackoffConfig::try_new(4, 100, 3.0, 500).unwrap(),
        ..PipelineConfig::deterministic()
    };
    let harness = Harness::with_config(config, 1);
    let stock = Arc::new(ScriptedStockChecker::always_failing());
    let pipeline = harness.pipeline().with_stock_checker(stock.clone());
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O1").build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().dead_letter, 1, WITHIN).await);
    running.shutdown().await;

    assert_eq!(stock.calls(), 4);
    let expected = [100, 300, 500].map(Duration::from_millis);
    for (gap, expected) in gaps(&stock.call_times()).into_iter().zip(expected) {
        assert!(gap >= expected, "{gap:?} shorter than {expected:?}");
        assert!(gap < expected + Duration::from_millis(100), "{gap:?} longer than {expected:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn unexpected_failure_follows_unknown_failure_policy() {
    let config = PipelineConfig {
        unknown_failures: UnknownFailurePolicy::DeadLetter,
        ..PipelineConfig::deterministic()
    };
    let harness = Harness::with_config(config, 1);
    let pipeline = harness
        .pipeline()
        .with_fulfillment(Arc::new(FailingFulfillment::new("warehouse offline")));
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O1").build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().dead_letter, 1, WITHIN).await);
    let stats = running.shutdown().await;

    assert_eq!(stats.orders.redeliveries, 0);
    assert_eq!(
        harness.dead_letters()[0].headers.last(EXCEPTION_CLASS_HEADER),
        Some("UnexpectedProcessingError")
    );
}

#[tokio::test(start_paused = true)]
async fn unexpected_failure_is_retried_by_default() {
    let harness = Harness::new();
    let pipeline = harness
        .pipeline()
        .with_fulfillment(Arc::new(FailingFulfillment::new("warehouse offline")));
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O1").build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().dead_letter, 1, WITHIN).await);
    let stats = running.shutdown().await;

    assert_eq!(stats.orders.redeliveries, 2);
    assert_eq!(stats.orders.dead_lettered, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_backoff_leaves_order_for_next_run() {
    let harness = Harness::new();
    let stock = Arc::new(ScriptedStockChecker::always_failing());
    let failing = harness.pipeline().with_stock_checker(stock.clone());
    let cancel = CancellationToken::new();
    let running = harness.start(&failing, &cancel);

    harness
        .submit(&failing, OrderBuilder::new().id("O1").build())
        .await;
    assert!(eventually(WITHIN, || stock.calls() == 1).await);
    let stats = running.shutdown().await;

    assert_eq!(stats.orders.redeliveries, 1);
    assert_eq!(stats.orders.acknowledged, 0);
    assert!(harness.acknowledged_orders().is_empty());

    let healthy = harness
        .pipeline()
        .with_fulfillment(Arc::new(ImmediateFulfillment));
    let cancel = CancellationToken::new();
    let running = harness.start(&healthy, &cancel);

    assert!(harness.broker.wait_for(&harness.topics().processed, 1, WITHIN).await);
    assert!(eventually(WITHIN, || harness.acknowledged_orders().len() == 1).await);
    let stats = running.shutdown().await;

    assert_eq!(stats.orders.acknowledged, 1);
    assert_eq!(harness.processed()[0].id, "O1");
    assert!(harness.dead_letters().is_empty());
}
