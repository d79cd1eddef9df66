//! Failure classification.
//!
//! This is the single place deciding whether a failed delivery is worth
//! another attempt. The scheduler and the dead-letter router only act on the
//! class returned here.

use crate::errors::ProcessingError;
use serde::{Deserialize, Serialize};

/// Whether a failure may succeed on redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    /// Transient; redeliver while attempts remain.
    Retriable,
    /// Permanent; dead-letter immediately.
    NonRetriable,
}

/// How failures of unknown origin are classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownFailurePolicy {
    /// Give unknown failures the benefit of the doubt and retry them.
    #[default]
    Retry,
    /// Treat unknown failures as defects and dead-letter them at once.
    DeadLetter,
}

/// Maps processing failures to a [`FailureClass`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureClassifier {
    unknown_failures: UnknownFailurePolicy,
}

impl FailureClassifier {
    /// Creates a classifier with the given policy for unknown failures.
    pub const fn new(unknown_failures: UnknownFailurePolicy) -> Self {
        Self { unknown_failures }
    }

    /// Classifies a failure.
    ///
    /// Validation and deserialization failures are defects in the message and
    /// never retried. Stock failures are always retried. Anything else follows
    /// the configured [`UnknownFailurePolicy`].
    pub const fn classify(&self, error: &ProcessingError) -> FailureClass {
        match error {
            ProcessingError::Validation { .. } | ProcessingError::Deserialization(_) => {
                FailureClass::NonRetriable
            }
            ProcessingError::StockUnavailable { .. } => FailureClass::Retriable,
            ProcessingError::Unexpected(_) => match self.unknown_failures {
                UnknownFailurePolicy::Retry => FailureClass::Retriable,
                UnknownFailurePolicy::DeadLetter => FailureClass::NonRetriable,
            },
        }
    }
}

/// Classifies a failure with the default policy.
pub const fn classify(error: &ProcessingError) -> FailureClass {
    FailureClassifier::new(UnknownFailurePolicy::Retry).classify(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_never_retried() {
        let error = ProcessingError::validation("O1", "customer id is required");
        assert_eq!(classify(&error), FailureClass::NonRetriable);
        assert_eq!(
            FailureClassifier::new(UnknownFailurePolicy::DeadLetter).classify(&error),
            FailureClass::NonRetriable
        );
    }

    #[test]
    fn stock_failures_are_always_retried() {
        let error = ProcessingError::stock_unavailable("O1", "X");
        assert_eq!(classify(&error), FailureClass::Retriable);
        assert_eq!(
            FailureClassifier::new(UnknownFailurePolicy::DeadLetter).classify(&error),
            FailureClass::Retriable
        );
    }

    #[test]
    fn undecodable_payloads_are_not_retried() {
        let error = ProcessingError::Deserialization("expected value".into());
        assert_eq!(classify(&error), FailureClass::NonRetriable);
    }

    #[test]
    fn unknown_failures_follow_policy() {
        let error = ProcessingError::Unexpected("boom".into());
        assert_eq!(classify(&error), FailureClass::Retriable);
        assert_eq!(
            FailureClassifier::new(UnknownFailurePolicy::DeadLetter).classify(&error),
            FailureClass::NonRetriable
        );
    }

    #[test]
    fn policy_deserializes_from_kebab_case() {
        let policy: UnknownFailurePolicy = serde_json::from_str("\"dead-letter\"").unwrap();
        assert_eq!(policy, UnknownFailurePolicy::DeadLetter);
    }
}
