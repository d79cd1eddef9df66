//! In-memory message broker for the `orderflow` pipeline
//!
//! This crate provides an in-process implementation of the
//! [`MessageProducer`] and [`MessageSource`] traits from the orderflow crate,
//! useful for tests, demos and development where a real broker is not
//! available.
//!
//! The broker keeps every record of every partition in memory and tracks
//! acknowledgements per consumer group. A consumer always receives the oldest
//! record of a partition that its group has not committed yet, so an
//! unacknowledged record is delivered again on the next poll.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orderflow::errors::{ChannelError, ChannelResult};
use orderflow::messaging::{
    ConsumedMessage, MessageProducer, MessageSource, OutboundMessage, RecordMetadata,
};
use orderflow::types::{epoch_millis_now, ConsumerGroup, MessageCoordinates, TopicName};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace};

/// How long a poll waits for a record before returning nothing.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

type CursorKey = (ConsumerGroup, TopicName, u32);

/// Acknowledgement state of one consumer group on one partition.
#[derive(Debug, Default)]
struct Cursor {
    // Every offset below the watermark is committed.
    low_watermark: u64,
    committed_above: BTreeSet<u64>,
}

impl Cursor {
    fn is_committed(&self, offset: u64) -> bool {
        offset < self.low_watermark || self.committed_above.contains(&offset)
    }

    fn commit(&mut self, offset: u64) -> bool {
        if self.is_committed(offset) {
            return false;
        }
        self.committed_above.insert(offset);
        while self.committed_above.remove(&self.low_watermark) {
            self.low_watermark += 1;
        }
        true
    }

    fn next_uncommitted(&self, len: u64) -> Option<u64> {
        (self.low_watermark..len).find(|offset| !self.committed_above.contains(offset))
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<TopicName, Vec<Vec<ConsumedMessage>>>,
    cursors: HashMap<CursorKey, Cursor>,
    unavailable: HashSet<TopicName>,
}

/// Thread-safe in-memory broker.
///
/// Cloning is cheap; clones share the same topics.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    appended: Arc<Notify>,
    round_robin: Arc<AtomicU32>,
}

impl InMemoryBroker {
    /// Creates a broker without topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a topic with `partitions` partitions.
    pub fn create_topic(&self, topic: &TopicName, partitions: u32) -> ChannelResult<()> {
        let mut state = self.state.write();
        if state.topics.contains_key(topic) {
            return Err(ChannelError::TopicExists(topic.to_string()));
        }
        let partitions = partitions.max(1);
        state
            .topics
            .insert(topic.clone(), (0..partitions).map(|_| Vec::new()).collect());
        info!(%topic, partitions, "topic created");
        Ok(())
    }

    /// Creates a topic unless it already exists.
    pub fn ensure_topic(&self, topic: &TopicName, partitions: u32) -> ChannelResult<()> {
        match self.create_topic(topic, partitions) {
            Ok(()) | Err(ChannelError::TopicExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Number of partitions of a topic.
    pub fn partition_count(&self, topic: &TopicName) -> ChannelResult<u32> {
        let state = self.state.read();
        let partitions = state
            .topics
            .get(topic)
            .ok_or_else(|| ChannelError::UnknownTopic(topic.to_string()))?;
        Ok(u32::try_from(partitions.len()).unwrap_or(u32::MAX))
    }

    /// Makes publishing to `topic` fail, or succeed again.
    pub fn set_available(&self, topic: &TopicName, available: bool) {
        let mut state = self.state.write();
        if available {
            state.unavailable.remove(topic);
        } else {
            state.unavailable.insert(topic.clone());
        }
    }

    /// Opens a consumer of `topic` for `group`.
    pub fn consumer(&self, topic: &TopicName, group: &ConsumerGroup) -> ChannelResult<InMemoryConsumer> {
        self.partition_count(topic)?;
        Ok(InMemoryConsumer {
            broker: self.clone(),
            topic: topic.clone(),
            group: group.clone(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        })
    }

    /// All records of a topic, partition by partition.
    pub fn records(&self, topic: &TopicName) -> Vec<ConsumedMessage> {
        self.state
            .read()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Offsets of `topic` committed by `group`, per partition.
    pub fn committed(&self, topic: &TopicName, group: &ConsumerGroup) -> Vec<MessageCoordinates> {
        let state = self.state.read();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                let partition = u32::try_from(partition).unwrap_or(u32::MAX);
                let cursor = state
                    .cursors
                    .get(&(group.clone(), topic.clone(), partition));
                records
                    .iter()
                    .filter(move |record| cursor.is_some_and(|c| c.is_committed(record.offset())))
                    .map(|record| record.coordinates.clone())
            })
            .collect()
    }

    /// Waits until `topic` holds at least `count` records or `within` elapses.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, topic: &TopicName, count: usize, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            let appended = self.appended.notified();
            if self.records(topic).len() >= count {
                return true;
            }
            if timeout_at(deadline, appended).await.is_err() {
                return self.records(topic).len() >= count;
            }
        }
    }

    fn place(&self, key: Option<&str>, partitions: u32) -> u32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                u32::try_from(hasher.finish() % u64::from(partitions)).unwrap_or(0)
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % partitions,
        }
    }

    fn append(&self, message: OutboundMessage) -> ChannelResult<RecordMetadata> {
        let mut state = self.state.write();
        if state.unavailable.contains(&message.topic) {
            return Err(ChannelError::Unavailable(format!(
                "topic {} is not accepting writes",
                message.topic
            )));
        }
        let partitions = state
            .topics
            .get_mut(&message.topic)
            .ok_or_else(|| ChannelError::UnknownTopic(message.topic.to_string()))?;
        let count = u32::try_from(partitions.len()).unwrap_or(u32::MAX);

        let partition = match message.partition {
            Some(partition) if partition >= count => {
                return Err(ChannelError::UnknownPartition {
                    topic: message.topic.to_string(),
                    partition,
                });
            }
            Some(partition) => partition,
            None => self.place(message.key.as_deref(), count),
        };

        let records = &mut partitions[partition as usize];
        let offset = records.len() as u64;
        records.push(ConsumedMessage {
            coordinates: MessageCoordinates {
                topic: message.topic.clone(),
                partition,
                offset,
                timestamp: epoch_millis_now(),
            },
            key: message.key,
            payload: message.payload,
            headers: message.headers,
        });

        Ok(RecordMetadata {
            topic: message.topic,
            partition,
            offset,
        })
    }
}

#[async_trait]
impl MessageProducer for InMemoryBroker {
    async fn send(&self, message: OutboundMessage) -> ChannelResult<RecordMetadata> {
        let metadata = self.append(message)?;
        trace!(
            topic = %metadata.topic,
            partition = metadata.partition,
            offset = metadata.offset,
            "record appended"
        );
        self.appended.notify_waiters();
        Ok(metadata)
    }
}

/// Consumer of one topic on behalf of one consumer group.
#[derive(Clone)]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    topic: TopicName,
    group: ConsumerGroup,
    poll_timeout: Duration,
}

impl InMemoryConsumer {
    /// Changes how long a poll waits for a record.
    #[must_use]
    pub const fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Consumer group of this consumer.
    pub const fn group(&self) -> &ConsumerGroup {
        &self.group
    }

    fn next_record(&self, partition: u32) -> ChannelResult<Option<ConsumedMessage>> {
        let state = self.broker.state.read();
        let records = state
            .topics
            .get(&self.topic)
            .ok_or_else(|| ChannelError::UnknownTopic(self.topic.to_string()))?
            .get(partition as usize)
            .ok_or_else(|| ChannelError::UnknownPartition {
                topic: self.topic.to_string(),
                partition,
            })?;

        let key = (self.group.clone(), self.topic.clone(), partition);
        let next = match state.cursors.get(&key) {
            Some(cursor) => cursor.next_uncommitted(records.len() as u64),
            None => (!records.is_empty()).then_some(0),
        };
        Ok(next
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|index| records.get(index).cloned()))
    }
}

#[async_trait]
impl MessageSource for InMemoryConsumer {
    fn topic(&self) -> &TopicName {
        &self.topic
    }

    fn partitions(&self) -> ChannelResult<Vec<u32>> {
        Ok((0..self.broker.partition_count(&self.topic)?).collect())
    }

    async fn poll(&self, partition: u32) -> ChannelResult<Option<ConsumedMessage>> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            let appended = self.broker.appended.notified();
            if let Some(record) = self.next_record(partition)? {
                return Ok(Some(record));
            }
            if timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&self, message: &ConsumedMessage) -> ChannelResult<()> {
        let mut state = self.broker.state.write();
        let key = (
            self.group.clone(),
            message.topic().clone(),
            message.partition(),
        );
        if !state.cursors.entry(key).or_default().commit(message.offset()) {
            return Err(ChannelError::AlreadyCommitted {
                coordinates: message.coordinates.clone(),
            });
        }
        debug!(group = %self.group, coordinates = %message.coordinates, "record committed");
        Ok(())
    }
}
