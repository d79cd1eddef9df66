//! Error types for the order pipeline.
//!
//! The error design separates three concerns:
//!
//! - **ProcessingError**: why a single delivery of an order failed. This is the
//!   taxonomy the failure classifier and the dead-letter router work from.
//! - **ChannelError**: failures of the messaging plumbing (publishing,
//!   polling, committing).
//! - **SchedulingError** / **ConfigError**: misuse of the redelivery scheduler
//!   and invalid configuration.
//!
//! # Failure taxonomy
//!
//! | Variant            | Origin                          | Default class  |
//! |--------------------|---------------------------------|----------------|
//! | `Validation`       | defect in the message itself    | non-retriable  |
//! | `StockUnavailable` | transient dependency condition  | retriable      |
//! | `Deserialization`  | payload is not an order         | non-retriable  |
//! | `Unexpected`       | anything else                   | retriable      |
//!
//! Classification itself lives in [`crate::classifier`]; nothing else in the
//! crate decides whether an error is worth retrying.

use crate::types::MessageCoordinates;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a single delivery attempt of an order failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    /// The order violates a business validation rule.
    #[error("Validation failed for order {order_id}: {reason}")]
    Validation {
        /// Identifier of the rejected order (may be empty).
        order_id: String,
        /// Human-readable rule that was violated.
        reason: String,
    },

    /// The stock check reported an item as unavailable.
    #[error("Stock unavailable for order {order_id}, item: {item}")]
    StockUnavailable {
        /// Identifier of the order being processed.
        order_id: String,
        /// First item that could not be reserved.
        item: String,
    },

    /// The record payload could not be decoded into an order.
    #[error("Failed to deserialize order payload: {0}")]
    Deserialization(String),

    /// Any other failure raised while processing.
    #[error("Unexpected processing failure: {0}")]
    Unexpected(String),
}

impl ProcessingError {
    /// Creates a validation failure for the given order.
    pub fn validation(order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            order_id: order_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a stock availability failure for the given order and item.
    pub fn stock_unavailable(order_id: impl Into<String>, item: impl Into<String>) -> Self {
        Self::StockUnavailable {
            order_id: order_id.into(),
            item: item.into(),
        }
    }

    /// The variable part of the failure message, without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation { reason, .. } => reason,
            Self::StockUnavailable { item, .. } => item,
            Self::Deserialization(detail) | Self::Unexpected(detail) => detail,
        }
    }

    /// Returns the kind of failure, independent of its details.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::StockUnavailable { .. } => FailureKind::Availability,
            Self::Deserialization(_) => FailureKind::Deserialization,
            Self::Unexpected(_) => FailureKind::Unexpected,
        }
    }
}

/// Kind of a [`ProcessingError`], without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Business validation failed.
    Validation,
    /// A dependency reported a transient availability problem.
    Availability,
    /// The payload was not a decodable order.
    Deserialization,
    /// Failure of unknown origin.
    Unexpected,
}

impl FailureKind {
    /// Stable failure name written to the `exception-class` dead-letter header.
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Validation => "OrderValidationError",
            Self::Availability => "StockUnavailableError",
            Self::Deserialization => "DeserializationError",
            Self::Unexpected => "UnexpectedProcessingError",
        }
    }
}

/// Errors raised by the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The topic does not exist on the broker.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The topic exists but has no such partition.
    #[error("Topic '{topic}' has no partition {partition}")]
    UnknownPartition {
        /// Topic that was addressed.
        topic: String,
        /// Partition that was requested.
        partition: u32,
    },

    /// A topic with the same name was already provisioned.
    #[error("Topic already exists: {0}")]
    TopicExists(String),

    /// The record was already acknowledged by this consumer group.
    #[error("Record {coordinates} was already committed")]
    AlreadyCommitted {
        /// Coordinates of the record that was committed twice.
        coordinates: MessageCoordinates,
    },

    /// Encoding a payload failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The broker connection is unavailable.
    #[error("Channel unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the redelivery scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    /// A redelivery is already pending for this message.
    #[error("Redelivery already scheduled for {0}")]
    AlreadyScheduled(MessageCoordinates),

    /// No redelivery is pending for this message.
    #[error("No redelivery scheduled for {0}")]
    NotScheduled(MessageCoordinates),
}

/// Errors raised while building configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration value is outside its accepted range or malformed.
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue {
        /// Name of the offending setting.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error for the given key.
    pub fn invalid(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for order processing.
pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// Result type for messaging operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
