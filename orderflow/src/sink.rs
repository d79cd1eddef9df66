//! Terminal consumer of the dead-letter channel.
//!
//! The sink reads dead-lettered records, extracts their diagnostic headers and
//! reports them for operators. It never republishes and runs without a
//! redelivery error handler: whatever happens, the record is acknowledged.

use crate::consumer::RecordHandler;
use crate::dead_letter::{
    EXCEPTION_CLASS_HEADER, EXCEPTION_MESSAGE_HEADER, ORIGINAL_OFFSET_HEADER,
    ORIGINAL_PARTITION_HEADER, ORIGINAL_TIMESTAMP_HEADER, ORIGINAL_TOPIC_HEADER,
};
use crate::errors::ProcessingResult;
use crate::messaging::ConsumedMessage;
use crate::order::Order;
use crate::types::MessageCoordinates;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Placeholder for a header the record does not carry.
pub const MISSING_HEADER: &str = "N/A";

/// Operator-facing category of a dead-lettered failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// The order itself is invalid.
    Validation,
    /// A dependency was unavailable for every attempt.
    Availability,
    /// The payload was not a valid order.
    Deserialization,
    /// Anything else.
    Unknown,
}

impl FailureCategory {
    /// Categorizes a failure by its class name.
    pub fn from_exception_class(class: &str) -> Self {
        if class.contains("Validation") {
            Self::Validation
        } else if class.contains("StockUnavailable") {
            Self::Availability
        } else if class.contains("Deserialization") {
            Self::Deserialization
        } else {
            Self::Unknown
        }
    }

    /// What an operator should do about records of this category.
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::Validation => "manual review required",
            Self::Availability => "check inventory service",
            Self::Deserialization => "check message format",
            Self::Unknown => "investigation required",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Availability => "availability",
            Self::Deserialization => "deserialization",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Diagnostic view of one dead-lettered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterReport {
    /// Where the record sits on the dead-letter topic.
    pub coordinates: MessageCoordinates,
    /// Failure class name, or `N/A`.
    pub exception_class: String,
    /// Failure message, or `N/A`.
    pub exception_message: String,
    /// Topic the record originally came from, or `N/A`.
    pub original_topic: String,
    /// Original partition, or `N/A`.
    pub original_partition: String,
    /// Original offset, or `N/A`.
    pub original_offset: String,
    /// Original broker timestamp in epoch milliseconds, or `N/A`.
    pub original_timestamp: String,
    /// Decoded order, when the payload is one.
    pub order: Option<Order>,
    /// Triage category.
    pub category: FailureCategory,
}

impl DeadLetterReport {
    /// Builds a report from a dead-lettered record. Never fails.
    pub fn from_message(message: &ConsumedMessage) -> Self {
        let header = |name: &str| {
            message
                .headers
                .last(name)
                .unwrap_or(MISSING_HEADER)
                .to_string()
        };
        let exception_class = header(EXCEPTION_CLASS_HEADER);

        Self {
            coordinates: message.coordinates.clone(),
            category: FailureCategory::from_exception_class(&exception_class),
            exception_class,
            exception_message: header(EXCEPTION_MESSAGE_HEADER),
            original_topic: header(ORIGINAL_TOPIC_HEADER),
            original_partition: header(ORIGINAL_PARTITION_HEADER),
            original_offset: header(ORIGINAL_OFFSET_HEADER),
            original_timestamp: header(ORIGINAL_TIMESTAMP_HEADER),
            order: Order::from_json(&message.payload).ok(),
        }
    }

    /// Identifier of the failed order, or `N/A`.
    pub fn order_id(&self) -> &str {
        self.order
            .as_ref()
            .map(|order| order.id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(MISSING_HEADER)
    }
}

/// Receives reports of dead-lettered records.
pub trait DeadLetterReporter: Send + Sync {
    /// Reports one record.
    fn report(&self, report: &DeadLetterReport);
}

/// Reports dead-lettered records as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl DeadLetterReporter for TracingReporter {
    fn report(&self, report: &DeadLetterReport) {
        error!(
            dlq_partition = report.coordinates.partition,
            dlq_offset = report.coordinates.offset,
            exception_class = %report.exception_class,
            exception_message = %report.exception_message,
            original_topic = %report.original_topic,
            original_partition = %report.original_partition,
            original_offset = %report.original_offset,
            original_timestamp = %report.original_timestamp,
            "dead-lettered message received"
        );

        match &report.order {
            Some(order) => error!(
                order_id = %order.id,
                customer_id = %order.customer_id,
                total_amount = %order.total_amount,
                status = %order.status,
                "failed order details"
            ),
            None => warn!("dead-lettered payload is not a decodable order"),
        }

        warn!(
            category = %report.category,
            action = report.category.suggested_action(),
            "dead-letter triage"
        );

        info!(
            "DLQ_METRIC: orderId={}, exception={}",
            report.order_id(),
            report.exception_class
        );
    }
}

/// Consumes the dead-letter channel.
#[derive(Clone)]
pub struct DeadLetterSink {
    reporter: Arc<dyn DeadLetterReporter>,
}

impl DeadLetterSink {
    /// Creates a sink reporting through `reporter`.
    pub fn new(reporter: Arc<dyn DeadLetterReporter>) -> Self {
        Self { reporter }
    }

    /// Builds and reports the diagnostic view of a record.
    pub fn inspect(&self, message: &ConsumedMessage) -> DeadLetterReport {
        let report = DeadLetterReport::from_message(message);
        self.reporter.report(&report);
        report
    }
}

impl Default for DeadLetterSink {
    fn default() -> Self {
        Self::new(Arc::new(TracingReporter))
    }
}

#[async_trait]
impl RecordHandler for DeadLetterSink {
    async fn handle(&self, message: &ConsumedMessage) -> ProcessingResult<()> {
        self.inspect(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::DeadLetterEnvelope;
    use crate::errors::ProcessingError;
    use crate::testing::builders::{MessageBuilder, OrderBuilder};
    use crate::testing::doubles::RecordingReporter;
    use crate::types::{Headers, TopicName};
    use tracing_test::traced_test;

    fn dead_lettered(failure: &ProcessingError) -> ConsumedMessage {
        let order = OrderBuilder::new().id("O3").build();
        let original = MessageBuilder::for_order(&order)
            .partition(1)
            .offset(8)
            .timestamp(1_700_000_000_123)
            .build();
        let envelope = DeadLetterEnvelope::build(&original, failure);

        MessageBuilder::new()
            .topic(TopicName::try_new("orders-dlq").unwrap())
            .partition(1)
            .payload(envelope.payload)
            .headers(envelope.headers.to_headers())
            .build()
    }

    #[test]
    fn categories_follow_exception_class_names() {
        let cases = [
            ("OrderValidationError", FailureCategory::Validation),
            ("StockUnavailableError", FailureCategory::Availability),
            ("DeserializationError", FailureCategory::Deserialization),
            ("UnexpectedProcessingError", FailureCategory::Unknown),
            (MISSING_HEADER, FailureCategory::Unknown),
        ];
        for (class, expected) in cases {
            assert_eq!(FailureCategory::from_exception_class(class), expected, "{class}");
        }
    }

    #[test]
    fn report_extracts_headers_and_order() {
        let message = dead_lettered(&ProcessingError::stock_unavailable("O3", "X"));

        let report = DeadLetterReport::from_message(&message);

        assert_eq!(report.exception_class, "StockUnavailableError");
        assert_eq!(report.original_topic, "orders-input");
        assert_eq!(report.original_partition, "1");
        assert_eq!(report.original_offset, "8");
        assert_eq!(report.original_timestamp, "1700000000123");
        assert_eq!(report.order_id(), "O3");
        assert_eq!(report.category, FailureCategory::Availability);
    }

    #[test]
    fn missing_headers_and_garbage_payload_are_tolerated() {
        let message = MessageBuilder::new()
            .payload(b"\x00\x01garbage".to_vec())
            .headers(Headers::new())
            .build();

        let report = DeadLetterReport::from_message(&message);

        assert_eq!(report.exception_class, MISSING_HEADER);
        assert_eq!(report.exception_message, MISSING_HEADER);
        assert_eq!(report.original_offset, MISSING_HEADER);
        assert_eq!(report.original_timestamp, MISSING_HEADER);
        assert!(report.order.is_none());
        assert_eq!(report.order_id(), MISSING_HEADER);
        assert_eq!(report.category, FailureCategory::Unknown);
    }

    #[tokio::test]
    async fn sink_reports_and_always_succeeds() {
        let reporter = Arc::new(RecordingReporter::new());
        let sink = DeadLetterSink::new(reporter.clone());

        let valid = dead_lettered(&ProcessingError::validation("O3", "customer id is required"));
        let garbage = MessageBuilder::new().payload(b"nope".to_vec()).build();

        assert!(sink.handle(&valid).await.is_ok());
        assert!(sink.handle(&garbage).await.is_ok());

        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].category, FailureCategory::Validation);
        assert_eq!(reports[1].category, FailureCategory::Unknown);
    }

    #[test]
    #[traced_test]
    fn tracing_reporter_emits_metric_line() {
        let message = dead_lettered(&ProcessingError::validation("O3", "customer id is required"));

        TracingReporter.report(&DeadLetterReport::from_message(&message));

        assert!(logs_contain("DLQ_METRIC: orderId=O3, exception=OrderValidationError"));
        assert!(logs_contain("manual review required"));
        assert!(logs_contain("original_timestamp=1700000000123"));
    }
}
