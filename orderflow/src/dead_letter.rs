//! Dead-letter routing.
//!
//! When a record fails permanently, or exhausts its redeliveries, it is
//! wrapped in a [`DeadLetterEnvelope`] that keeps the original payload bytes
//! untouched and records where the record came from and why it failed. The
//! envelope is published to the dead-letter topic on the same partition number
//! as the original record, preserving relative order per source partition.

use crate::errors::{ChannelError, ProcessingError};
use crate::messaging::{ConsumedMessage, MessageProducer, OutboundMessage, RecordMetadata};
use crate::types::{Headers, TopicName};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

/// Header carrying the failure class name.
pub const EXCEPTION_CLASS_HEADER: &str = "exception-class";
/// Header carrying the failure message.
pub const EXCEPTION_MESSAGE_HEADER: &str = "exception-message";
/// Header carrying the topic the record was originally read from.
pub const ORIGINAL_TOPIC_HEADER: &str = "original-topic";
/// Header carrying the original partition.
pub const ORIGINAL_PARTITION_HEADER: &str = "original-partition";
/// Header carrying the original offset.
pub const ORIGINAL_OFFSET_HEADER: &str = "original-offset";
/// Header carrying the original broker timestamp.
pub const ORIGINAL_TIMESTAMP_HEADER: &str = "original-timestamp";

const EMPTY_MESSAGE_PLACEHOLDER: &str = "(no message)";

/// Diagnostic metadata attached to a dead-lettered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterHeaders {
    /// Failure class name of the most recent failure.
    pub exception_class: String,
    /// Failure message of the most recent failure, never empty.
    pub exception_message: String,
    /// Topic of the original record.
    pub original_topic: String,
    /// Partition of the original record.
    pub original_partition: u32,
    /// Offset of the original record.
    pub original_offset: u64,
    /// Broker timestamp of the original record, epoch milliseconds.
    pub original_timestamp: i64,
}

impl DeadLetterHeaders {
    /// Renders the metadata as record headers.
    pub fn to_headers(&self) -> Headers {
        Headers::new()
            .with(EXCEPTION_CLASS_HEADER, &self.exception_class)
            .with(EXCEPTION_MESSAGE_HEADER, &self.exception_message)
            .with(ORIGINAL_TOPIC_HEADER, &self.original_topic)
            .with(ORIGINAL_PARTITION_HEADER, self.original_partition.to_string())
            .with(ORIGINAL_OFFSET_HEADER, self.original_offset.to_string())
            .with(ORIGINAL_TIMESTAMP_HEADER, self.original_timestamp.to_string())
    }
}

/// Whether the envelope reached the dead-letter channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterDelivery {
    /// Stored on the dead-letter topic.
    Published(RecordMetadata),
    /// Publishing failed; the original record must not be acknowledged.
    Failed(ChannelError),
}

/// A failed record ready for, or already on, the dead-letter channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEnvelope {
    /// Key of the original record.
    pub key: Option<String>,
    /// Original payload bytes, unchanged.
    pub payload: Vec<u8>,
    /// Diagnostic metadata.
    pub headers: DeadLetterHeaders,
    /// Outcome of publishing the envelope.
    pub delivery: Option<DeadLetterDelivery>,
}

impl DeadLetterEnvelope {
    /// Wraps `original` with the metadata of `failure`.
    pub fn build(original: &ConsumedMessage, failure: &ProcessingError) -> Self {
        let exception_message = if failure.detail().trim().is_empty() {
            EMPTY_MESSAGE_PLACEHOLDER.to_string()
        } else {
            failure.to_string()
        };

        Self {
            key: original.key.clone(),
            payload: original.payload.clone(),
            headers: DeadLetterHeaders {
                exception_class: failure.kind().class_name().to_string(),
                exception_message,
                original_topic: original.topic().to_string(),
                original_partition: original.partition(),
                original_offset: original.offset(),
                original_timestamp: original.timestamp(),
            },
            delivery: None,
        }
    }

    /// Whether the envelope was stored on the dead-letter topic.
    pub const fn is_published(&self) -> bool {
        matches!(self.delivery, Some(DeadLetterDelivery::Published(_)))
    }

    fn to_outbound(&self, topic: &TopicName) -> OutboundMessage {
        OutboundMessage {
            topic: topic.clone(),
            key: self.key.clone(),
            partition: Some(self.headers.original_partition),
            payload: self.payload.clone(),
            headers: self.headers.to_headers(),
        }
    }
}

/// Publishes failed records to the dead-letter topic.
#[derive(Clone)]
pub struct DeadLetterRouter {
    producer: Arc<dyn MessageProducer>,
    topic: TopicName,
}

impl DeadLetterRouter {
    /// Creates a router publishing to `topic`.
    pub fn new(producer: Arc<dyn MessageProducer>, topic: TopicName) -> Self {
        Self { producer, topic }
    }

    /// Dead-letter topic of this router.
    pub const fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Builds the envelope for `original` and publishes it.
    ///
    /// Never fails: the publish outcome is recorded on the returned envelope.
    /// If the dead-letter topic lacks the original partition the envelope is
    /// placed by key instead.
    pub async fn route(
        &self,
        original: &ConsumedMessage,
        failure: &ProcessingError,
    ) -> DeadLetterEnvelope {
        let mut envelope = DeadLetterEnvelope::build(original, failure);
        let outbound = envelope.to_outbound(&self.topic);

        error!(
            topic = %original.topic(),
            partition = original.partition(),
            offset = original.offset(),
            exception = %envelope.headers.exception_message,
            "routing message to dead-letter topic {}",
            self.topic
        );

        let result = match self.producer.send(outbound.clone()).await {
            Err(ChannelError::UnknownPartition { partition, .. }) => {
                warn!(
                    partition,
                    "dead-letter topic has no matching partition, placing by key"
                );
                self.producer
                    .send(OutboundMessage {
                        partition: None,
                        ..outbound
                    })
                    .await
            }
            other => other,
        };

        envelope.delivery = Some(match result {
            Ok(metadata) => DeadLetterDelivery::Published(metadata),
            Err(e) => {
                error!(
                    error = %e,
                    topic = %original.topic(),
                    partition = original.partition(),
                    offset = original.offset(),
                    "failed to publish to dead-letter topic"
                );
                DeadLetterDelivery::Failed(e)
            }
        });
        envelope
    }
}
