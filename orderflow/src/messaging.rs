//! Consumer-side view of the message broker.
//!
//! The broker itself (partition placement, replication, offset storage) is an
//! external collaborator. The pipeline only depends on the two traits defined
//! here, which adapters such as the in-memory broker implement.

use crate::errors::ChannelResult;
use crate::types::{Headers, MessageCoordinates, TopicName};
use async_trait::async_trait;

/// A record read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    /// Where the record lives on the broker.
    pub coordinates: MessageCoordinates,
    /// Message key, if any.
    pub key: Option<String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Record headers.
    pub headers: Headers,
}

impl ConsumedMessage {
    /// Topic of the record.
    pub const fn topic(&self) -> &TopicName {
        &self.coordinates.topic
    }

    /// Partition of the record.
    pub const fn partition(&self) -> u32 {
        self.coordinates.partition
    }

    /// Offset of the record.
    pub const fn offset(&self) -> u64 {
        self.coordinates.offset
    }

    /// Broker timestamp of the record, epoch milliseconds.
    pub const fn timestamp(&self) -> i64 {
        self.coordinates.timestamp
    }
}

/// A record to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: TopicName,
    /// Message key, used for partition placement when no partition is given.
    pub key: Option<String>,
    /// Explicit destination partition.
    pub partition: Option<u32>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Record headers.
    pub headers: Headers,
}

impl OutboundMessage {
    /// Creates a keyed message without headers.
    pub fn keyed(topic: TopicName, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic,
            key: Some(key.into()),
            partition: None,
            payload,
            headers: Headers::new(),
        }
    }

    /// Targets an explicit partition.
    #[must_use]
    pub const fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Replaces the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Where a published record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic written to.
    pub topic: TopicName,
    /// Partition written to.
    pub partition: u32,
    /// Offset assigned to the record.
    pub offset: u64,
}

/// Publishes records to the broker.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Publishes a record and returns where it was stored.
    async fn send(&self, message: OutboundMessage) -> ChannelResult<RecordMetadata>;
}

/// Reads records of one topic on behalf of one consumer group.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Topic this source reads.
    fn topic(&self) -> &TopicName;

    /// Partitions of the topic.
    fn partitions(&self) -> ChannelResult<Vec<u32>>;

    /// Returns the oldest unacknowledged record of `partition`, waiting a
    /// bounded time for one to arrive.
    ///
    /// A record that has not been committed is returned again by the next
    /// poll; this is how redelivery happens.
    async fn poll(&self, partition: u32) -> ChannelResult<Option<ConsumedMessage>>;

    /// Acknowledges a record. Committing the same record twice is an error.
    async fn commit(&self, message: &ConsumedMessage) -> ChannelResult<()>;
}
