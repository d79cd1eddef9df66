//! Deterministic test doubles for the pipeline's collaborators.

use crate::consumer::RecordHandler;
use crate::errors::{ChannelError, ChannelResult, ProcessingError, ProcessingResult};
use crate::fulfillment::Fulfillment;
use crate::messaging::{ConsumedMessage, MessageProducer, MessageSource, OutboundMessage, RecordMetadata};
use crate::order::Order;
use crate::sink::{DeadLetterReport, DeadLetterReporter};
use crate::stock::StockChecker;
use crate::types::TopicName;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Stock checker failing a fixed number of times before succeeding.
#[derive(Debug, Default)]
pub struct ScriptedStockChecker {
    failures: u32,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedStockChecker {
    /// Fails the first `failures` checks with `StockUnavailable`.
    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every check.
    pub fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    /// Number of checks performed.
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// When each check happened.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StockChecker for ScriptedStockChecker {
    async fn check(&self, order: &Order) -> ProcessingResult<()> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(Instant::now());
            calls.len()
        };
        if u32::try_from(call).unwrap_or(u32::MAX) <= self.failures {
            let item = order.items.first().cloned().unwrap_or_default();
            return Err(ProcessingError::stock_unavailable(&order.id, item));
        }
        Ok(())
    }
}

/// Downstream step that always fails with an unexpected error.
#[derive(Debug, Clone)]
pub struct FailingFulfillment {
    message: String,
}

impl FailingFulfillment {
    /// Fails with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Fulfillment for FailingFulfillment {
    async fn fulfil(&self, _order: &Order) -> ProcessingResult<()> {
        Err(ProcessingError::Unexpected(self.message.clone()))
    }
}

/// Producer recording every message it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingProducer {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: bool,
    partitions: Option<u32>,
}

impl RecordingProducer {
    /// Accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every message as if the broker were down.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Rejects messages addressed to a partition at or above `count`.
    pub fn with_partitions(count: u32) -> Self {
        Self {
            partitions: Some(count),
            ..Self::default()
        }
    }

    /// Messages accepted so far.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageProducer for RecordingProducer {
    async fn send(&self, message: OutboundMessage) -> ChannelResult<RecordMetadata> {
        if self.failing {
            return Err(ChannelError::Unavailable("broker down".to_string()));
        }
        if let (Some(count), Some(partition)) = (self.partitions, message.partition) {
            if partition >= count {
                return Err(ChannelError::UnknownPartition {
                    topic: message.topic.to_string(),
                    partition,
                });
            }
        }

        let mut sent = self.sent.lock();
        let metadata = RecordMetadata {
            topic: message.topic.clone(),
            partition: message.partition.unwrap_or(0),
            offset: sent.len() as u64,
        };
        sent.push(message);
        Ok(metadata)
    }
}

/// Reporter collecting dead-letter reports.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<DeadLetterReport>>,
}

impl RecordingReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far.
    pub fn reports(&self) -> Vec<DeadLetterReport> {
        self.reports.lock().clone()
    }
}

impl DeadLetterReporter for RecordingReporter {
    fn report(&self, report: &DeadLetterReport) {
        self.reports.lock().push(report.clone());
    }
}

/// Record handler with a scripted outcome.
#[derive(Debug)]
pub struct ScriptedHandler {
    failure: Option<ProcessingError>,
    failures_left: AtomicU32,
    calls: Mutex<Vec<Instant>>,
    called: Notify,
}

impl ScriptedHandler {
    /// Succeeds on every call.
    pub fn succeeding() -> Self {
        Self::failing_times(0, ProcessingError::Unexpected(String::new()))
    }

    /// Fails with `error` on every call.
    pub fn always_failing(error: ProcessingError) -> Self {
        Self::failing_times(u32::MAX, error)
    }

    /// Fails with `error` on the first `times` calls, then succeeds.
    pub fn failing_times(times: u32, error: ProcessingError) -> Self {
        Self {
            failure: Some(error),
            failures_left: AtomicU32::new(times),
            calls: Mutex::new(Vec::new()),
            called: Notify::new(),
        }
    }

    /// When each call happened.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    /// Waits until the handler has been called at least `count` times.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.called.notified();
            if self.calls.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl RecordHandler for ScriptedHandler {
    async fn handle(&self, _message: &ConsumedMessage) -> ProcessingResult<()> {
        self.calls.lock().push(Instant::now());
        self.called.notify_waiters();

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        match (&self.failure, failing) {
            (Some(error), true) => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

/// Single-partition source replaying a fixed list of records.
///
/// `poll` returns the oldest uncommitted record, so a record left
/// unacknowledged is delivered again.
#[derive(Debug)]
pub struct ScriptedSource {
    topic: TopicName,
    messages: Vec<ConsumedMessage>,
    committed: Mutex<BTreeSet<u64>>,
    commit_log: Mutex<Vec<u64>>,
    changed: Notify,
}

impl ScriptedSource {
    /// Serves `messages` on partition 0.
    pub fn new(messages: impl IntoIterator<Item = ConsumedMessage>) -> Self {
        let messages: Vec<_> = messages.into_iter().collect();
        let topic = messages.first().map_or_else(
            || TopicName::try_new(crate::config::ORDERS_INPUT_TOPIC).expect("valid topic name"),
            |m| m.topic().clone(),
        );
        Self {
            topic,
            messages,
            committed: Mutex::new(BTreeSet::new()),
            commit_log: Mutex::new(Vec::new()),
            changed: Notify::new(),
        }
    }

    /// Offsets committed so far, in commit order.
    pub fn commits(&self) -> Vec<u64> {
        self.commit_log.lock().clone()
    }

    /// Waits until every record has been committed.
    pub async fn wait_until_drained(&self) {
        loop {
            let notified = self.changed.notified();
            if self.committed.lock().len() >= self.messages.len() {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    fn topic(&self) -> &TopicName {
        &self.topic
    }

    fn partitions(&self) -> ChannelResult<Vec<u32>> {
        Ok(vec![0])
    }

    async fn poll(&self, partition: u32) -> ChannelResult<Option<ConsumedMessage>> {
        if partition != 0 {
            return Err(ChannelError::UnknownPartition {
                topic: self.topic.to_string(),
                partition,
            });
        }
        let next = {
            let committed = self.committed.lock();
            self.messages
                .iter()
                .find(|m| !committed.contains(&m.offset()))
                .cloned()
        };
        if next.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(next)
    }

    async fn commit(&self, message: &ConsumedMessage) -> ChannelResult<()> {
        if !self.committed.lock().insert(message.offset()) {
            return Err(ChannelError::AlreadyCommitted {
                coordinates: message.coordinates.clone(),
            });
        }
        self.commit_log.lock().push(message.offset());
        self.changed.notify_waiters();
        Ok(())
    }
}
