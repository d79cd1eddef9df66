//! Partition consumers and the redelivery error handler.
//!
//! Each partition of a topic is served by one [`ConsumerWorker`] task. The
//! worker polls a record, hands it to a [`RecordHandler`] and settles it:
//! success acknowledges the record, failure goes to the optional
//! [`RedeliveryErrorHandler`], which either dead-letters the record (then it is
//! acknowledged) or schedules a redelivery. While a redelivery is pending the
//! worker waits on its own timer queue, so only that partition is held back.
//!
//! Shutdown is cooperative via a [`CancellationToken`]. A record already being
//! handled is finished and settled; a record waiting for redelivery is left
//! unacknowledged so the broker delivers it again after restart.

use crate::classifier::{FailureClass, FailureClassifier};
use crate::dead_letter::{DeadLetterEnvelope, DeadLetterRouter};
use crate::errors::{ChannelError, ChannelResult, ProcessingError, ProcessingResult};
use crate::messaging::{ConsumedMessage, MessageSource};
use crate::retry::{BackoffPolicy, RetryDecision, RetryScheduler};
use async_trait::async_trait;
use futures::future::join_all;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause after a transient polling failure.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Business logic applied to each consumed record.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Handles one delivery of a record.
    async fn handle(&self, message: &ConsumedMessage) -> ProcessingResult<()>;
}

/// What the worker does with a record after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Commit the record.
    Acknowledge,
    /// Leave the record uncommitted and deliver it again once due.
    Redeliver,
}

/// Result of handing a failed delivery to the error handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// A redelivery was scheduled.
    Redelivery {
        /// Attempt number of the redelivery.
        attempt: u32,
        /// Delay before the redelivery.
        delay: Duration,
    },
    /// The record was routed to the dead-letter channel.
    DeadLettered(DeadLetterEnvelope),
    /// Dead-lettering failed; the record is held for a later retry.
    Held {
        /// Delay before the record is delivered again.
        delay: Duration,
    },
}

impl FailureOutcome {
    /// How the worker settles the record.
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::DeadLettered(_) => Disposition::Acknowledge,
            Self::Redelivery { .. } | Self::Held { .. } => Disposition::Redeliver,
        }
    }
}

/// Settings shared by all redelivery error handlers of a worker group.
#[derive(Clone)]
pub struct RedeliveryConfig {
    /// Classifies failures as retriable or not.
    pub classifier: FailureClassifier,
    /// Backoff applied to retriable failures.
    pub policy: BackoffPolicy,
    /// Destination of records that cannot be processed.
    pub router: DeadLetterRouter,
}

/// How a worker group treats handler failures.
#[derive(Clone)]
pub enum ErrorHandling {
    /// Classify, redeliver with backoff, then dead-letter.
    Redeliver(RedeliveryConfig),
    /// Log the failure and acknowledge the record. Used by terminal consumers.
    LogAndAcknowledge,
}

impl ErrorHandling {
    fn handler(&self) -> Option<RedeliveryErrorHandler> {
        match self {
            Self::Redeliver(config) => Some(RedeliveryErrorHandler::new(config.clone())),
            Self::LogAndAcknowledge => None,
        }
    }
}

/// Decides the fate of failed deliveries for one partition.
pub struct RedeliveryErrorHandler {
    classifier: FailureClassifier,
    scheduler: RetryScheduler,
    router: DeadLetterRouter,
}

impl RedeliveryErrorHandler {
    /// Creates an error handler with its own delivery-attempt state.
    pub fn new(config: RedeliveryConfig) -> Self {
        Self {
            classifier: config.classifier,
            scheduler: RetryScheduler::new(config.policy),
            router: config.router,
        }
    }

    /// Registers a delivery and returns its attempt number.
    pub fn begin_attempt(&mut self, message: &ConsumedMessage) -> u32 {
        self.scheduler.begin_attempt(&message.coordinates)
    }

    /// Attempt state of a message, for inspection.
    pub const fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// Handles a failed delivery.
    ///
    /// Retriable failures with attempts remaining are scheduled for
    /// redelivery. Everything else is routed to the dead-letter channel; if
    /// that publish fails the record is held and retried later instead of
    /// being acknowledged.
    pub async fn handle_failure(
        &mut self,
        message: &ConsumedMessage,
        error: &ProcessingError,
    ) -> FailureOutcome {
        let coordinates = &message.coordinates;
        let class = self.classifier.classify(error);
        let attempt = self.scheduler.begin_attempt(coordinates);

        let decision = match self.scheduler.on_failure(coordinates, error, class) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, %coordinates, "redelivery already pending");
                let delay = self.scheduler.policy().delay_for(attempt);
                return FailureOutcome::Redelivery { attempt, delay };
            }
        };

        match decision {
            RetryDecision::Redeliver {
                next_attempt,
                delay,
            } => {
                warn!(
                    attempt,
                    topic = %message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "delivery attempt failed, redelivering"
                );
                FailureOutcome::Redelivery {
                    attempt: next_attempt,
                    delay,
                }
            }
            RetryDecision::DeadLetter(reason) => {
                debug!(?reason, ?class, attempt, "dead-lettering message");
                if class == FailureClass::NonRetriable {
                    info!(error = %error, "non-retriable failure, skipping redelivery");
                }
                let envelope = self.router.route(message, error).await;
                if envelope.is_published() {
                    self.scheduler.complete(coordinates);
                    return FailureOutcome::DeadLettered(envelope);
                }

                let delay = self.scheduler.policy().max_delay();
                if let Err(e) = self.scheduler.hold(coordinates, delay) {
                    warn!(error = %e, %coordinates, "redelivery already pending");
                }
                FailureOutcome::Held { delay }
            }
        }
    }

    /// Forgets a message that was handled successfully.
    pub fn handle_success(&mut self, message: &ConsumedMessage) {
        if let Some(state) = self.scheduler.complete(&message.coordinates) {
            if state.attempt > 1 {
                info!(
                    attempt = state.attempt,
                    coordinates = %message.coordinates,
                    "message succeeded after redelivery"
                );
            }
        }
    }

    /// Waits until the pending redelivery of `message` is due.
    pub async fn wait_for_redelivery(&mut self, message: &ConsumedMessage) {
        if let Err(e) = self.scheduler.wait_for_redelivery(&message.coordinates).await {
            debug!(error = %e, "no redelivery pending, polling immediately");
        }
    }

    /// Drops all state of a message left unacknowledged at shutdown.
    pub fn abandon(&mut self, message: &ConsumedMessage) {
        self.scheduler.complete(&message.coordinates);
    }
}

/// Counters reported by a worker when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Records committed.
    pub acknowledged: u64,
    /// Redeliveries scheduled.
    pub redeliveries: u64,
    /// Records stored on the dead-letter channel.
    pub dead_lettered: u64,
    /// Deliveries whose handler returned an error.
    pub handler_failures: u64,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.acknowledged += other.acknowledged;
        self.redeliveries += other.redeliveries;
        self.dead_lettered += other.dead_lettered;
        self.handler_failures += other.handler_failures;
    }
}

/// Consumes one partition of a topic.
pub struct ConsumerWorker {
    name: String,
    source: Arc<dyn MessageSource>,
    partition: u32,
    handler: Arc<dyn RecordHandler>,
    error_handler: Option<RedeliveryErrorHandler>,
}

impl ConsumerWorker {
    /// Creates a worker for `partition` of the source's topic.
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn MessageSource>,
        partition: u32,
        handler: Arc<dyn RecordHandler>,
        error_handler: Option<RedeliveryErrorHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            partition,
            handler,
            error_handler,
        }
    }

    /// Runs until cancelled or until the partition becomes unreachable.
    #[instrument(skip_all, fields(worker = %self.name, partition = self.partition))]
    pub async fn run(self, cancel: CancellationToken) -> ChannelResult<WorkerStats> {
        let Self {
            source,
            partition,
            handler,
            mut error_handler,
            ..
        } = self;
        let mut stats = WorkerStats::default();
        info!(topic = %source.topic(), "consumer started");

        loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                polled = source.poll(partition) => polled,
            };

            let message = match polled {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e @ (ChannelError::UnknownTopic(_) | ChannelError::UnknownPartition { .. })) => {
                    error!(error = %e, "partition unavailable, stopping consumer");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "poll failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                    }
                }
            };

            let attempt = error_handler
                .as_mut()
                .map_or(1, |h| h.begin_attempt(&message));
            debug!(offset = message.offset(), attempt, "handling message");

            let error = match handler.handle(&message).await {
                Ok(()) => {
                    if let Some(h) = error_handler.as_mut() {
                        h.handle_success(&message);
                    }
                    acknowledge(source.as_ref(), &message, &mut stats).await;
                    continue;
                }
                Err(error) => error,
            };
            stats.handler_failures += 1;

            let Some(h) = error_handler.as_mut() else {
                error!(
                    offset = message.offset(),
                    error = %error,
                    "handler failed, acknowledging without redelivery"
                );
                acknowledge(source.as_ref(), &message, &mut stats).await;
                continue;
            };

            let outcome = h.handle_failure(&message, &error).await;
            match outcome.disposition() {
                Disposition::Acknowledge => {
                    stats.dead_lettered += 1;
                    acknowledge(source.as_ref(), &message, &mut stats).await;
                }
                Disposition::Redeliver => {
                    stats.redeliveries += 1;
                    let cancelled = tokio::select! {
                        () = cancel.cancelled() => true,
                        () = h.wait_for_redelivery(&message) => false,
                    };
                    if cancelled {
                        info!(
                            offset = message.offset(),
                            "shutdown during redelivery backoff, leaving message unacknowledged"
                        );
                        h.abandon(&message);
                        break;
                    }
                }
            }
        }

        info!(
            acknowledged = stats.acknowledged,
            redeliveries = stats.redeliveries,
            dead_lettered = stats.dead_lettered,
            "consumer stopped"
        );
        Ok(stats)
    }
}

async fn acknowledge(source: &dyn MessageSource, message: &ConsumedMessage, stats: &mut WorkerStats) {
    match source.commit(message).await {
        Ok(()) => stats.acknowledged += 1,
        Err(e @ ChannelError::AlreadyCommitted { .. }) => {
            warn!(error = %e, "message acknowledged twice");
        }
        Err(e) => error!(
            error = %e,
            coordinates = %message.coordinates,
            "commit failed, message will be delivered again"
        ),
    }
}

/// One worker task per partition of a topic, stopped together.
pub struct WorkerGroup {
    name: String,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<ChannelResult<WorkerStats>>>,
}

impl WorkerGroup {
    /// Spawns a worker for every partition of the source's topic.
    ///
    /// Workers stop when `cancel` is cancelled or when the group is shut down.
    pub fn spawn(
        name: impl Into<String>,
        source: Arc<dyn MessageSource>,
        handler: Arc<dyn RecordHandler>,
        error_handling: &ErrorHandling,
        cancel: &CancellationToken,
    ) -> ChannelResult<Self> {
        let name = name.into();
        let cancel = cancel.child_token();
        let partitions = source.partitions()?;

        let handles = partitions
            .into_iter()
            .map(|partition| {
                let worker = ConsumerWorker::new(
                    format!("{name}-{partition}"),
                    Arc::clone(&source),
                    partition,
                    Arc::clone(&handler),
                    error_handling.handler(),
                );
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect::<Vec<_>>();

        info!(group = %name, workers = handles.len(), "worker group started");
        Ok(Self {
            name,
            cancel,
            handles,
        })
    }

    /// Number of workers in the group.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the group has no workers.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Token that stops every worker of the group.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops all workers and returns their combined counters.
    pub async fn shutdown(self) -> WorkerStats {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for all workers to stop and returns their combined counters.
    pub async fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for result in join_all(self.handles).await {
            match result {
                Ok(Ok(stats)) => total += stats,
                Ok(Err(e)) => error!(group = %self.name, error = %e, "worker failed"),
                Err(e) => error!(group = %self.name, error = %e, "worker task panicked"),
            }
        }
        info!(group = %self.name, ?total, "worker group stopped");
        total
    }
}
