//! `orderflow` - order processing pipeline with dead-letter routing
//!
//! Orders arrive on an input channel and are driven through a small state
//! machine (`PENDING -> PROCESSING -> COMPLETED | FAILED`). Failed deliveries
//! are classified as retriable or not; retriable ones are redelivered with
//! exponential backoff, everything else (and anything that exhausts its
//! attempts) is routed to a dead-letter channel together with diagnostic
//! headers, where a terminal sink reports it for operators.
//!
//! The broker is abstracted behind [`messaging::MessageProducer`] and
//! [`messaging::MessageSource`]; `orderflow-memory` provides an in-process
//! implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classifier;
pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod errors;
pub mod fulfillment;
pub mod ingress;
pub mod messaging;
pub mod order;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod sink;
pub mod stock;
pub mod types;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classifier::{FailureClass, FailureClassifier, UnknownFailurePolicy};
pub use config::{BackoffConfig, PipelineConfig};
pub use consumer::{RecordHandler, WorkerGroup, WorkerStats};
pub use dead_letter::{DeadLetterEnvelope, DeadLetterRouter};
pub use errors::{ChannelError, ConfigError, ProcessingError};
pub use messaging::{ConsumedMessage, MessageProducer, MessageSource, OutboundMessage};
pub use order::{Order, OrderStatus};
pub use pipeline::{OrderPipeline, RunningPipeline};
pub use processor::OrderProcessor;
pub use retry::{BackoffPolicy, RetryScheduler};
pub use sink::{DeadLetterReporter, DeadLetterSink};
pub use types::{ConsumerGroup, TopicName};
