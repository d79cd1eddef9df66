//! The reference order scenarios, end to end on the in-memory broker.

use std::time::Duration;

use orderflow::dead_letter::EXCEPTION_MESSAGE_HEADER;
use orderflow::{Order, OrderStatus};
use orderflow_integration_tests::{eventually, Harness};
use rust_decimal_macros::dec;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const WITHIN: Duration = Duration::from_secs(30);

fn order(id: &str, customer_id: &str, total: rust_decimal::Decimal) -> Order {
    Order::new(id, customer_id, vec!["X".to_string()], total)
}

#[tokio::test(start_paused = true)]
async fn o1_is_completed() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    let submitted_at = orderflow::types::epoch_millis_now();
    harness.submit(&pipeline, order("O1", "C1", dec!(50.0))).await;

    assert!(harness.broker.wait_for(&harness.topics().processed, 1, WITHIN).await);
    assert!(eventually(WITHIN, || harness.acknowledged_orders().len() == 1).await);
    running.shutdown().await;

    let processed = harness.processed();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].id, "O1");
    assert_eq!(processed[0].status, OrderStatus::Completed);
    assert!(processed[0].timestamp >= submitted_at);
    assert!(harness.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn o2_without_customer_is_dead_lettered() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness.submit(&pipeline, order("O2", "", dec!(50.0))).await;

    assert!(harness.broker.wait_for(&harness.topics().dead_letter, 1, WITHIN).await);
    assert!(eventually(WITHIN, || harness.acknowledged_orders().len() == 1).await);
    running.shutdown().await;

    let dead = harness.dead_letters();
    assert_eq!(dead.len(), 1);
    let failed = Order::from_json(&dead[0].payload).unwrap();
    assert_eq!(failed.id, "O2");
    let message = dead[0].headers.last(EXCEPTION_MESSAGE_HEADER).unwrap();
    assert!(message.contains("customer id"), "unexpected message: {message}");
    assert!(harness.processed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn o3_over_the_limit_is_dead_lettered_on_first_attempt() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    let start = Instant::now();
    harness.submit(&pipeline, order("O3", "C3", dec!(15000.0))).await;

    assert!(harness.broker.wait_for(&harness.topics().dead_letter, 1, WITHIN).await);
    let elapsed = start.elapsed();
    let stats = running.shutdown().await;

    assert!(elapsed < Duration::from_secs(1), "dead-lettered after {elapsed:?}");
    assert_eq!(stats.orders.redeliveries, 0);
    assert!(harness.processed().is_empty());
}
