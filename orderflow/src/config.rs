//! Type-safe pipeline configuration.
//!
//! Numeric settings are wrapped in `nutype` newtypes so that an out-of-range
//! backoff or failure rate cannot be constructed. The defaults reproduce the
//! production topology: three topics, one consumer group per stage, and a
//! three-attempt exponential backoff starting at one second.

use crate::classifier::UnknownFailurePolicy;
use crate::errors::ConfigError;
use crate::types::{ConsumerGroup, TopicName};
use nutype::nutype;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default name of the topic orders are submitted to.
pub const ORDERS_INPUT_TOPIC: &str = "orders-input";
/// Default name of the topic completed orders are published to.
pub const ORDERS_PROCESSED_TOPIC: &str = "orders-processed";
/// Default name of the dead-letter topic.
pub const ORDERS_DLQ_TOPIC: &str = "orders-dlq";
/// Default consumer group of the order consumer.
pub const ORDER_CONSUMER_GROUP: &str = "order-consumer-group";
/// Default consumer group of the dead-letter sink.
pub const DLQ_CONSUMER_GROUP: &str = "dlq-consumer-group";

/// Total number of delivery attempts for one message, first delivery included.
///
/// Validated to be between 1 and 10 so a misconfiguration cannot produce an
/// unbounded redelivery loop.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxDeliveryAttempts(u32);

/// Delay before the first redelivery, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct InitialDelayMs(u64);

impl InitialDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Upper bound on any single redelivery delay, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 300_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxDelayMs(u64);

impl MaxDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Growth factor applied to the delay after each redelivery.
#[nutype(
    validate(greater_or_equal = 1.0, less_or_equal = 10.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BackoffMultiplier(f64);

/// Probability, in percent, that the simulated stock check fails.
#[nutype(
    validate(less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct FailurePercent(u8);

/// Redelivery backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Total attempts before a retriable failure is dead-lettered.
    pub max_attempts: MaxDeliveryAttempts,
    /// Delay before the first redelivery.
    pub initial_delay: InitialDelayMs,
    /// Multiplier applied for each further redelivery.
    pub multiplier: BackoffMultiplier,
    /// Cap on any single delay.
    pub max_delay: MaxDelayMs,
}

impl BackoffConfig {
    /// Builds a backoff configuration from raw values, validating each.
    pub fn try_new(
        max_attempts: u32,
        initial_delay_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_attempts: MaxDeliveryAttempts::try_new(max_attempts)
                .map_err(|e| ConfigError::invalid("max_attempts", e))?,
            initial_delay: InitialDelayMs::try_new(initial_delay_ms)
                .map_err(|e| ConfigError::invalid("initial_delay_ms", e))?,
            multiplier: BackoffMultiplier::try_new(multiplier)
                .map_err(|e| ConfigError::invalid("multiplier", e))?,
            max_delay: MaxDelayMs::try_new(max_delay_ms)
                .map_err(|e| ConfigError::invalid("max_delay_ms", e))?,
        };

        if config.initial_delay.into_inner() > config.max_delay.into_inner() {
            return Err(ConfigError::invalid(
                "initial_delay_ms",
                format!("{initial_delay_ms}ms exceeds max delay of {max_delay_ms}ms"),
            ));
        }

        Ok(config)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::try_new(3, 1_000, 2.0, 10_000).expect("default backoff settings are valid")
    }
}

/// Inclusive range of simulated latency for an external dependency call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRange {
    min_ms: u64,
    max_ms: u64,
}

impl LatencyRange {
    /// Creates a latency range, rejecting ranges whose bounds are inverted.
    pub fn try_new(min_ms: u64, max_ms: u64) -> Result<Self, ConfigError> {
        if min_ms > max_ms {
            return Err(ConfigError::invalid(
                "latency",
                format!("minimum {min_ms}ms is greater than maximum {max_ms}ms"),
            ));
        }
        Ok(Self { min_ms, max_ms })
    }

    /// A range that never delays.
    pub const fn none() -> Self {
        Self {
            min_ms: 0,
            max_ms: 0,
        }
    }

    /// Lower bound in milliseconds.
    pub const fn min_ms(self) -> u64 {
        self.min_ms
    }

    /// Upper bound in milliseconds.
    pub const fn max_ms(self) -> u64 {
        self.max_ms
    }

    /// Draws a delay uniformly from the range.
    pub fn sample(self) -> Duration {
        if self.min_ms == self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

/// Simulated stock dependency settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSimulationConfig {
    /// Whether the simulated stock check may fail at all.
    pub simulate_failures: bool,
    /// Chance of failure per check when failures are simulated.
    pub failure_percent: FailurePercent,
    /// Simulated latency of a successful check.
    pub latency: LatencyRange,
}

impl Default for StockSimulationConfig {
    fn default() -> Self {
        Self {
            simulate_failures: true,
            failure_percent: FailurePercent::try_new(10).expect("10 is a valid percentage"),
            latency: LatencyRange {
                min_ms: 50,
                max_ms: 150,
            },
        }
    }
}

/// Channel names used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Topic orders are consumed from.
    pub input: TopicName,
    /// Topic completed orders are published to.
    pub processed: TopicName,
    /// Topic failed orders are dead-lettered to.
    pub dead_letter: TopicName,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            input: TopicName::try_new(ORDERS_INPUT_TOPIC).expect("valid topic name"),
            processed: TopicName::try_new(ORDERS_PROCESSED_TOPIC).expect("valid topic name"),
            dead_letter: TopicName::try_new(ORDERS_DLQ_TOPIC).expect("valid topic name"),
        }
    }
}

/// Complete configuration of the order pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Channel names.
    pub topics: TopicsConfig,
    /// Consumer group of the order consumer.
    pub order_group: ConsumerGroup,
    /// Consumer group of the dead-letter sink.
    pub dead_letter_group: ConsumerGroup,
    /// Redelivery backoff.
    pub backoff: BackoffConfig,
    /// How failures of unknown origin are classified.
    pub unknown_failures: UnknownFailurePolicy,
    /// Simulated stock dependency.
    pub stock: StockSimulationConfig,
    /// Simulated latency of the downstream processing step.
    pub fulfillment_latency: LatencyRange,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topics: TopicsConfig::default(),
            order_group: ConsumerGroup::try_new(ORDER_CONSUMER_GROUP)
                .expect("valid consumer group"),
            dead_letter_group: ConsumerGroup::try_new(DLQ_CONSUMER_GROUP)
                .expect("valid consumer group"),
            backoff: BackoffConfig::default(),
            unknown_failures: UnknownFailurePolicy::default(),
            stock: StockSimulationConfig::default(),
            fulfillment_latency: LatencyRange {
                min_ms: 100,
                max_ms: 300,
            },
        }
    }
}

impl PipelineConfig {
    /// Configuration with deterministic, zero-latency simulated dependencies.
    pub fn deterministic() -> Self {
        Self {
            stock: StockSimulationConfig {
                simulate_failures: false,
                latency: LatencyRange::none(),
                ..StockSimulationConfig::default()
            },
            fulfillment_latency: LatencyRange::none(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_backoff_matches_production_settings() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.max_attempts.into_inner(), 3);
        assert_eq!(backoff.initial_delay.as_duration(), Duration::from_secs(1));
        assert!((backoff.multiplier.into_inner() - 2.0).abs() < f64::EPSILON);
        assert_eq!(backoff.max_delay.as_duration(), Duration::from_secs(10));
    }

    #[test]
    fn default_topology_names() {
        let config = PipelineConfig::default();
        assert_eq!(config.topics.input.as_ref(), "orders-input");
        assert_eq!(config.topics.processed.as_ref(), "orders-processed");
        assert_eq!(config.topics.dead_letter.as_ref(), "orders-dlq");
        assert_eq!(config.order_group.as_ref(), "order-consumer-group");
        assert_eq!(config.dead_letter_group.as_ref(), "dlq-consumer-group");
        assert!(config.stock.simulate_failures);
    }

    #[test]
    fn deterministic_config_disables_failures_and_latency() {
        let config = PipelineConfig::deterministic();
        assert!(!config.stock.simulate_failures);
        assert_eq!(config.stock.latency, LatencyRange::none());
        assert_eq!(config.fulfillment_latency.sample(), Duration::ZERO);
    }

    #[test]
    fn backoff_rejects_initial_delay_above_cap() {
        let error = BackoffConfig::try_new(3, 20_000, 2.0, 10_000).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { ref key, .. } if key == "initial_delay_ms"));
    }

    #[test]
    fn backoff_rejects_zero_attempts() {
        assert!(BackoffConfig::try_new(0, 1_000, 2.0, 10_000).is_err());
    }

    #[test]
    fn latency_range_rejects_inverted_bounds() {
        assert!(LatencyRange::try_new(300, 100).is_err());
    }

    proptest! {
        #[test]
        fn max_attempts_accepts_valid_range(n in 1u32..=10) {
            prop_assert!(MaxDeliveryAttempts::try_new(n).is_ok());
        }

        #[test]
        fn max_attempts_rejects_out_of_range(n in 11u32..1000) {
            prop_assert!(MaxDeliveryAttempts::try_new(n).is_err());
        }

        #[test]
        fn failure_percent_rejects_above_hundred(n in 101u8..=255) {
            prop_assert!(FailurePercent::try_new(n).is_err());
        }

        #[test]
        fn latency_sample_stays_in_range(min in 0u64..500, extra in 0u64..500) {
            let range = LatencyRange::try_new(min, min + extra).unwrap();
            let sample = range.sample();
            prop_assert!(sample >= Duration::from_millis(min));
            prop_assert!(sample <= Duration::from_millis(min + extra));
        }
    }
}
