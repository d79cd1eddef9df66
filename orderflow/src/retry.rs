//! Redelivery policy and scheduling.
//!
//! This module contains the backoff policy that decides what happens to a
//! failed delivery, and the scheduler that tracks delivery attempts and pending
//! redeliveries per message. Redelivery is driven by the consumer: a record
//! that is not acknowledged is delivered again once its delay has elapsed, so
//! a pending redelivery only holds back its own partition.

use crate::classifier::FailureClass;
use crate::config::BackoffConfig;
use crate::errors::{FailureKind, ProcessingError, SchedulingError};
use crate::types::MessageCoordinates;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl BackoffPolicy {
    /// Creates a policy from validated configuration.
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.into_inner(),
            initial_delay: config.initial_delay.as_duration(),
            multiplier: config.multiplier.into_inner(),
            max_delay: config.max_delay.as_duration(),
        }
    }

    /// Total delivery attempts, first delivery included.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Largest delay the policy ever produces.
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before the given redelivery (1 for the first redelivery).
    ///
    /// Grows as `initial * multiplier^(n-1)` and is capped at the maximum delay.
    pub fn delay_for(&self, redelivery: u32) -> Duration {
        let exponent = i32::try_from(redelivery.saturating_sub(1)).unwrap_or(i32::MAX);
        let initial_ms = self.initial_delay.as_secs_f64() * 1_000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1_000.0;
        let scaled_ms = initial_ms * self.multiplier.powi(exponent);

        if !scaled_ms.is_finite() || scaled_ms >= max_ms {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled_ms / 1_000.0).min(self.max_delay)
    }

    /// Decides the fate of a failed delivery attempt.
    ///
    /// Non-retriable failures are dead-lettered on first occurrence. Retriable
    /// failures are redelivered until `attempt` reaches the bound.
    pub fn decide(&self, attempt: u32, class: FailureClass) -> RetryDecision {
        match class {
            FailureClass::NonRetriable => RetryDecision::DeadLetter(DeadLetterReason::NonRetriable),
            FailureClass::Retriable if attempt >= self.max_attempts => {
                RetryDecision::DeadLetter(DeadLetterReason::AttemptsExhausted { attempts: attempt })
            }
            FailureClass::Retriable => RetryDecision::Redeliver {
                next_attempt: attempt + 1,
                delay: self.delay_for(attempt),
            },
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

/// Outcome of a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Deliver the same record again after `delay`.
    Redeliver {
        /// Attempt number of the redelivery.
        next_attempt: u32,
        /// Time to wait before redelivering.
        delay: Duration,
    },
    /// Hand the record to the dead-letter router.
    DeadLetter(DeadLetterReason),
}

/// Why a record was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterReason {
    /// The failure was classified as non-retriable.
    NonRetriable,
    /// The failure was retriable but no attempts remain.
    AttemptsExhausted {
        /// Attempts made, first delivery included.
        attempts: u32,
    },
}

/// The failure recorded for a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Kind of the failure.
    pub kind: FailureKind,
    /// Failure message.
    pub message: String,
}

impl From<&ProcessingError> for FailureRecord {
    fn from(error: &ProcessingError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Delivery state of one logical message. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// Broker coordinates of the message.
    pub coordinates: MessageCoordinates,
    /// Current attempt number, starting at 1.
    pub attempt: u32,
    /// Delay before the next attempt, when one is scheduled.
    pub next_delay: Option<Duration>,
    /// Most recent failure.
    pub last_failure: Option<FailureRecord>,
}

impl DeliveryAttempt {
    fn first(coordinates: MessageCoordinates) -> Self {
        Self {
            coordinates,
            attempt: 1,
            next_delay: None,
            last_failure: None,
        }
    }
}

/// Timer queue of pending redeliveries keyed by message coordinates.
#[derive(Debug, Default)]
pub struct RedeliveryQueue {
    due: HashMap<MessageCoordinates, Instant>,
}

impl RedeliveryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a redelivery of `coordinates` after `delay`.
    ///
    /// At most one redelivery may be pending per message.
    pub fn schedule(
        &mut self,
        coordinates: &MessageCoordinates,
        delay: Duration,
    ) -> Result<Instant, SchedulingError> {
        if self.due.contains_key(coordinates) {
            return Err(SchedulingError::AlreadyScheduled(coordinates.clone()));
        }
        let due = Instant::now() + delay;
        self.due.insert(coordinates.clone(), due);
        Ok(due)
    }

    /// When the pending redelivery of `coordinates` is due.
    pub fn due_at(&self, coordinates: &MessageCoordinates) -> Option<Instant> {
        self.due.get(coordinates).copied()
    }

    /// Waits until the redelivery of `coordinates` is due, then releases it.
    ///
    /// If the future is dropped before completion the redelivery stays pending.
    pub async fn wait(&mut self, coordinates: &MessageCoordinates) -> Result<(), SchedulingError> {
        let due = self
            .due_at(coordinates)
            .ok_or_else(|| SchedulingError::NotScheduled(coordinates.clone()))?;
        sleep_until(due).await;
        self.due.remove(coordinates);
        Ok(())
    }

    /// Drops a pending redelivery, returning whether one existed.
    pub fn cancel(&mut self, coordinates: &MessageCoordinates) -> bool {
        self.due.remove(coordinates).is_some()
    }

    /// Number of pending redeliveries.
    pub fn len(&self) -> usize {
        self.due.len()
    }

    /// Whether no redelivery is pending.
    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}

/// Tracks delivery attempts and schedules redeliveries.
///
/// One scheduler is owned by each partition worker; it is never shared.
#[derive(Debug)]
pub struct RetryScheduler {
    policy: BackoffPolicy,
    attempts: HashMap<MessageCoordinates, DeliveryAttempt>,
    queue: RedeliveryQueue,
}

impl RetryScheduler {
    /// Creates a scheduler using the given policy.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: HashMap::new(),
            queue: RedeliveryQueue::new(),
        }
    }

    /// The backoff policy in use.
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Registers a delivery of `coordinates` and returns its attempt number.
    ///
    /// The first delivery is attempt 1; a redelivery reports the attempt number
    /// assigned when it was scheduled.
    pub fn begin_attempt(&mut self, coordinates: &MessageCoordinates) -> u32 {
        self.attempts
            .entry(coordinates.clone())
            .or_insert_with(|| DeliveryAttempt::first(coordinates.clone()))
            .attempt
    }

    /// Records a failure of the current attempt and decides what happens next.
    ///
    /// A redelivery decision is scheduled on the timer queue and advances the
    /// attempt counter. Scheduling twice for the same message fails.
    pub fn on_failure(
        &mut self,
        coordinates: &MessageCoordinates,
        error: &ProcessingError,
        class: FailureClass,
    ) -> Result<RetryDecision, SchedulingError> {
        let attempt = self.begin_attempt(coordinates);
        let decision = self.policy.decide(attempt, class);

        if let RetryDecision::Redeliver {
            next_attempt,
            delay,
        } = decision
        {
            self.queue.schedule(coordinates, delay)?;
            if let Some(state) = self.attempts.get_mut(coordinates) {
                state.attempt = next_attempt;
                state.next_delay = Some(delay);
            }
        }

        if let Some(state) = self.attempts.get_mut(coordinates) {
            state.last_failure = Some(FailureRecord::from(error));
        }

        Ok(decision)
    }

    /// Schedules a redelivery outside the backoff policy, keeping the attempt number.
    ///
    /// Used when a record cannot be settled at all, for example when the
    /// dead-letter channel is unreachable.
    pub fn hold(
        &mut self,
        coordinates: &MessageCoordinates,
        delay: Duration,
    ) -> Result<(), SchedulingError> {
        self.queue.schedule(coordinates, delay)?;
        if let Some(state) = self.attempts.get_mut(coordinates) {
            state.next_delay = Some(delay);
        }
        Ok(())
    }

    /// Waits until the pending redelivery of `coordinates` is due.
    pub async fn wait_for_redelivery(
        &mut self,
        coordinates: &MessageCoordinates,
    ) -> Result<(), SchedulingError> {
        self.queue.wait(coordinates).await?;
        if let Some(state) = self.attempts.get_mut(coordinates) {
            state.next_delay = None;
        }
        Ok(())
    }

    /// Current delivery state of a message.
    pub fn attempt(&self, coordinates: &MessageCoordinates) -> Option<&DeliveryAttempt> {
        self.attempts.get(coordinates)
    }

    /// Whether a redelivery of `coordinates` is pending.
    pub fn is_scheduled(&self, coordinates: &MessageCoordinates) -> bool {
        self.queue.due_at(coordinates).is_some()
    }

    /// Forgets a settled message, returning its final delivery state.
    pub fn complete(&mut self, coordinates: &MessageCoordinates) -> Option<DeliveryAttempt> {
        self.queue.cancel(coordinates);
        self.attempts.remove(coordinates)
    }

    /// Number of messages with tracked delivery state.
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}
