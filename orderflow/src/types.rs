//! Core types shared across the order pipeline.
//!
//! Names that identify broker resources use smart constructors so that an
//! empty topic or consumer group can never reach the messaging layer.

use chrono::Utc;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a message channel (topic).
///
/// `TopicName` values are guaranteed to be non-empty and at most 249
/// characters once constructed.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 249),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct TopicName(String);

/// Name of a consumer group sharing committed positions on a topic.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ConsumerGroup(String);

/// Returns the current wall-clock time as epoch milliseconds.
pub fn epoch_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

/// Position of a record on the broker.
///
/// Coordinates identify one logical message for the whole of its delivery
/// history: every redelivery of the record carries the same coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageCoordinates {
    /// Topic the record was read from.
    pub topic: TopicName,
    /// Partition within the topic.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Broker timestamp of the record, epoch milliseconds.
    pub timestamp: i64,
}

impl fmt::Display for MessageCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Ordered list of string headers attached to a record.
///
/// Several values may exist for the same key; lookups return the last one,
/// matching broker semantics for re-published records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header set.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a header, keeping any earlier value for the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Builder-style variant of [`Headers::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the most recent value stored under `key`.
    pub fn last(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers, counting repeated keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the header set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
