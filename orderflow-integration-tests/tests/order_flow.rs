//! Orders travelling from the ingress to the processed topic.

use std::sync::Arc;
use std::time::Duration;

use orderflow::fulfillment::ImmediateFulfillment;
use orderflow::stock::AlwaysInStock;
use orderflow::testing::prelude::*;
use orderflow::OrderStatus;
use orderflow_integration_tests::{eventually, Harness};
use tokio_util::sync::CancellationToken;

const WITHIN: Duration = Duration::from_secs(5);

#[tokio::test(start_paused = true)]
async fn valid_order_is_completed_and_acknowledged() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O1").build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().processed, 1, WITHIN).await);
    assert!(eventually(WITHIN, || harness.acknowledged_orders().len() == 1).await);
    let stats = running.shutdown().await;

    let processed = harness.processed();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].id, "O1");
    assert_eq!(processed[0].status, OrderStatus::Completed);
    assert!(harness.dead_letters().is_empty());
    assert_eq!(stats.orders.acknowledged, 1);
    assert_eq!(stats.orders.redeliveries, 0);
}

#[tokio::test(start_paused = true)]
async fn order_arriving_as_processing_is_completed() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit_raw(
            "O1",
            br#"{"id":"O1","customerId":"C1","items":["X"],"totalAmount":50.0,"status":"PROCESSING"}"#,
        )
        .await
        .unwrap();

    assert!(harness.broker.wait_for(&harness.topics().processed, 1, WITHIN).await);
    let stats = running.shutdown().await;

    assert_eq!(harness.processed()[0].status, OrderStatus::Completed);
    assert!(harness.dead_letters().is_empty());
    assert_eq!(stats.orders.redeliveries, 0);
}

#[tokio::test(start_paused = true)]
async fn completed_order_keeps_its_key() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    harness
        .submit(&pipeline, OrderBuilder::new().id("O-42").build())
        .await;

    assert!(harness.broker.wait_for(&harness.topics().processed, 1, WITHIN).await);
    running.shutdown().await;

    let records = harness.broker.records(&harness.topics().processed);
    assert_eq!(records[0].key.as_deref(), Some("O-42"));
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_is_processed_again() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    let order = OrderBuilder::new().id("O1").build();
    harness.submit(&pipeline, order.clone()).await;
    harness.submit(&pipeline, order).await;

    assert!(harness.broker.wait_for(&harness.topics().processed, 2, WITHIN).await);
    running.shutdown().await;

    let processed = harness.processed();
    assert_eq!(processed.len(), 2);
    assert!(processed.iter().all(|order| order.id == "O1"));
    assert!(harness.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn orders_on_every_partition_are_processed() {
    let harness = Harness::with_partitions(3);
    let pipeline = harness
        .pipeline()
        .with_stock_checker(Arc::new(AlwaysInStock))
        .with_fulfillment(Arc::new(ImmediateFulfillment));
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    for n in 0..12 {
        harness
            .submit(&pipeline, OrderBuilder::new().id(format!("O{n}")).build())
            .await;
    }

    assert!(harness.broker.wait_for(&harness.topics().processed, 12, WITHIN).await);
    assert!(eventually(WITHIN, || harness.acknowledged_orders().len() == 12).await);
    let stats = running.shutdown().await;

    let mut ids: Vec<_> = harness.processed().into_iter().map(|order| order.id).collect();
    ids.sort();
    let mut expected: Vec<_> = (0..12).map(|n| format!("O{n}")).collect();
    expected.sort();
    assert_eq!(ids, expected);
    assert_eq!(stats.orders.acknowledged, 12);
}

#[tokio::test(start_paused = true)]
async fn generated_orders_pass_through() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let cancel = CancellationToken::new();
    let running = harness.start(&pipeline, &cancel);

    let ingress = pipeline.ingress();
    for _ in 0..5 {
        ingress.generate().await.unwrap();
    }

    assert!(harness.broker.wait_for(&harness.topics().processed, 5, WITHIN).await);
    running.shutdown().await;

    assert!(harness.dead_letters().is_empty());
    assert!(harness
        .processed()
        .iter()
        .all(|order| order.status == OrderStatus::Completed));
}
