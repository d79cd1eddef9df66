//! The order entity and its wire format.
//!
//! Orders travel as JSON documents with camelCase field names. Missing string
//! and list fields decode as empty values so that incomplete orders are
//! rejected by validation, with a business reason, rather than by the decoder.

use crate::errors::{ChannelError, ChannelResult, ProcessingError, ProcessingResult};
use crate::types::epoch_millis_now;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Submitted, not yet picked up.
    #[default]
    Pending,
    /// Validated and going through the dependency checks.
    Processing,
    /// Terminal success.
    Completed,
    /// Terminal failure of the current delivery.
    Failed,
}

impl OrderStatus {
    /// Whether the processing state machine may move from `self` to `next`.
    ///
    /// A delivered order always restarts at `Processing`, whatever status it
    /// carried on the wire, including `Processing` itself: a duplicate delivery
    /// of a completed order is processed again rather than rejected.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Processing) | (Self::Processing, Self::Completed) | (_, Self::Failed)
        )
    }

    /// Whether this status ends the state machine.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Business transaction identifier.
    #[serde(default)]
    pub id: String,
    /// Customer placing the order.
    #[serde(default)]
    pub customer_id: String,
    /// Ordered item references.
    #[serde(default)]
    pub items: Vec<String>,
    /// Order total.
    #[serde(default, with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: OrderStatus,
    /// Creation time, refreshed on completion (epoch milliseconds).
    #[serde(default)]
    pub timestamp: i64,
}

impl Order {
    /// Creates a pending order stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        customer_id: impl Into<String>,
        items: Vec<String>,
        total_amount: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            items,
            total_amount,
            status: OrderStatus::Pending,
            timestamp: epoch_millis_now(),
        }
    }

    /// Creates a randomized pending order, as produced by the generator endpoint.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let customer = rng.random_range(0..1000);
        let cents: i64 = rng.random_range(1..20_000);
        Self::new(
            Uuid::new_v4().to_string(),
            format!("CUST-{customer}"),
            vec!["Item1".to_string(), "Item2".to_string()],
            Decimal::new(cents, 2),
        )
    }

    /// Moves the order to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: OrderStatus) -> ProcessingResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProcessingError::Unexpected(format!(
                "illegal status transition for order {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Completes the order, refreshing its timestamp.
    ///
    /// The new timestamp never goes backwards, even if the wall clock does.
    pub fn complete(&mut self, now_millis: i64) -> ProcessingResult<()> {
        self.transition(OrderStatus::Completed)?;
        self.timestamp = now_millis.max(self.timestamp);
        Ok(())
    }

    /// Marks the current delivery as failed.
    pub fn fail(&mut self) {
        self.status = OrderStatus::Failed;
    }

    /// Decodes an order from its JSON wire format.
    pub fn from_json(payload: &[u8]) -> ProcessingResult<Self> {
        serde_json::from_slice(payload).map_err(|e| ProcessingError::Deserialization(e.to_string()))
    }

    /// Encodes the order into its JSON wire format.
    pub fn to_json(&self) -> ChannelResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChannelError::Serialization(e.to_string()))
    }

    /// Message key used when publishing this order.
    pub fn message_key(&self) -> String {
        if self.id.trim().is_empty() {
            "no-id".to_string()
        } else {
            self.id.clone()
        }
    }
}
