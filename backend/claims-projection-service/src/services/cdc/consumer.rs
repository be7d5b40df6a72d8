use rdkafka::consumer::StreamConsumer;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::materializer::{ApplyOutcome, Materializer};
use super::models::ChangeEnvelope;
use super::readiness::CatchUpTracker;
use crate::error::{ProjectionError, Result};
use crate::metrics::ProjectionMetrics;

/// Threshold for consecutive errors before marking consumer as unhealthy
const UNHEALTHY_ERROR_THRESHOLD: u32 = 5;

/// Threshold for consecutive errors before emitting critical warning
const CRITICAL_ERROR_THRESHOLD: u32 = 10;

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Error handling state for the ingestion loop
pub struct ConsumerErrorState {
    /// Number of consecutive errors
    consecutive_count: AtomicU32,
    /// Timestamp of last successful receive (Unix millis)
    last_success_ms: AtomicU64,
}

impl ConsumerErrorState {
    pub fn new() -> Self {
        Self {
            consecutive_count: AtomicU32::new(0),
            last_success_ms: AtomicU64::new(now_millis()),
        }
    }

    /// Record a successful receive, resetting error count
    pub fn record_success(&self) {
        self.consecutive_count.store(0, Ordering::SeqCst);
        self.last_success_ms.store(now_millis(), Ordering::SeqCst);
    }

    /// Record an error, returning the new consecutive count
    pub fn record_error(&self) -> u32 {
        self.consecutive_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_count.load(Ordering::SeqCst)
    }

    pub fn time_since_success(&self) -> Duration {
        let last = self.last_success_ms.load(Ordering::SeqCst);
        Duration::from_millis(now_millis().saturating_sub(last))
    }

    /// Exponential pause between failed receives: 1s, 2s, 4s ... capped at 30s
    pub fn calculate_backoff(&self) -> Duration {
        const MIN_BACKOFF_SECS: u64 = 1;
        const MAX_BACKOFF_SECS: u64 = 30;

        let errors = self.consecutive_errors();
        if errors == 0 {
            return Duration::from_secs(MIN_BACKOFF_SECS);
        }

        let backoff_secs = 2u64
            .saturating_pow(errors.saturating_sub(1))
            .min(MAX_BACKOFF_SECS);
        Duration::from_secs(backoff_secs)
    }

    /// False once errors pile up or nothing has been received for five minutes
    /// while failing
    pub fn is_healthy(&self) -> bool {
        let errors = self.consecutive_errors();

        if errors >= UNHEALTHY_ERROR_THRESHOLD {
            return false;
        }

        !(self.time_since_success() > Duration::from_secs(300) && errors > 0)
    }

    pub fn status(&self, ready: bool, rows: usize) -> ConsumerStatus {
        ConsumerStatus {
            healthy: self.is_healthy(),
            ready,
            rows,
            consecutive_errors: self.consecutive_errors(),
            time_since_last_success: self.time_since_success(),
            current_backoff: self.calculate_backoff(),
        }
    }
}

impl Default for ConsumerErrorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information for the ingestion loop
#[derive(Debug, Clone)]
pub struct ConsumerStatus {
    pub healthy: bool,
    /// Whether the backlog has been replayed
    pub ready: bool,
    /// Rows currently in the projection
    pub rows: usize,
    pub consecutive_errors: u32,
    pub time_since_last_success: Duration,
    pub current_backoff: Duration,
}

/// Errors that no amount of retrying fixes: bad credentials, missing ACLs, a
/// missing topic or a broken TLS setup.
pub(crate) fn is_fatal(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::SaslAuthenticationFailed
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::ClusterAuthorizationFailed
                | RDKafkaErrorCode::UnknownTopicOrPartition
                | RDKafkaErrorCode::UnknownTopic
                | RDKafkaErrorCode::SSL
        )
    )
}

/// Per-envelope pipeline: materialize, account, advance the ready barrier.
///
/// Kept apart from the Kafka loop so it can be driven directly.
pub struct EnvelopeHandler {
    materializer: Materializer,
    tracker: CatchUpTracker,
    ready_tx: Arc<watch::Sender<bool>>,
    metrics: ProjectionMetrics,
}

impl EnvelopeHandler {
    /// An empty backlog makes the projection ready immediately.
    pub fn new(
        materializer: Materializer,
        tracker: CatchUpTracker,
        ready_tx: Arc<watch::Sender<bool>>,
        metrics: ProjectionMetrics,
    ) -> Self {
        let handler = Self {
            materializer,
            tracker,
            ready_tx,
            metrics,
        };
        if handler.tracker.is_caught_up() {
            handler.mark_ready();
        }
        handler
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Apply one envelope. Malformed envelopes are logged and skipped.
    pub fn handle(&mut self, envelope: &ChangeEnvelope) -> Option<ApplyOutcome> {
        let outcome = match self.materializer.apply(envelope) {
            Ok(outcome) => {
                self.metrics.envelopes_applied_total.inc();
                if matches!(outcome, ApplyOutcome::Removed { .. }) {
                    self.metrics.tombstones_total.inc();
                }
                self.metrics
                    .store_rows
                    .set(self.materializer.store().len() as i64);
                Some(outcome)
            }
            Err(e) => {
                self.metrics.decode_failures_total.inc();
                warn!(
                    partition = envelope.partition,
                    offset = envelope.offset,
                    error = %e,
                    "Skipping malformed CDC envelope"
                );
                None
            }
        };

        if self.tracker.observe(envelope.partition, envelope.offset) {
            self.mark_ready();
        }

        outcome
    }

    pub fn end_of_partition(&mut self, partition: i32) {
        debug!(partition, "Reached end of partition");
        if self.tracker.end_of_partition(partition) {
            self.mark_ready();
        }
    }

    fn mark_ready(&self) {
        if self.ready_tx.send_replace(true) {
            return;
        }
        self.metrics.projection_ready.set(1);
        info!(
            rows = self.materializer.store().len(),
            "Projection caught up with the CDC backlog, serving reads"
        );
    }
}

/// Background loop feeding broker messages into an [`EnvelopeHandler`]
pub struct CdcIngestor {
    consumer: Arc<StreamConsumer>,
    handler: EnvelopeHandler,
    error_state: Arc<ConsumerErrorState>,
    metrics: ProjectionMetrics,
}

impl CdcIngestor {
    pub fn new(
        consumer: Arc<StreamConsumer>,
        handler: EnvelopeHandler,
        error_state: Arc<ConsumerErrorState>,
        metrics: ProjectionMetrics,
    ) -> Self {
        Self {
            consumer,
            handler,
            error_state,
            metrics,
        }
    }

    /// Consume until `shutdown` flips to `true` (or its sender goes away).
    ///
    /// Returns an error only for a fatal broker error seen before the projection
    /// became ready; after that every receive error is retried with backoff.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting CDC ingestion loop");

        loop {
            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("CDC ingestion loop stopped");
                        return Ok(());
                    }
                    continue;
                }
                received = self.consumer.recv() => {
                    received.map(|msg| ChangeEnvelope::from_message(&msg))
                }
            };

            match received {
                Ok(envelope) => {
                    self.error_state.record_success();
                    self.metrics.consecutive_errors.set(0);

                    debug!(
                        partition = envelope.partition,
                        offset = envelope.offset,
                        tombstone = envelope.is_tombstone(),
                        "Received CDC envelope"
                    );

                    self.handler.handle(&envelope);
                }
                Err(KafkaError::PartitionEOF(partition)) => {
                    self.error_state.record_success();
                    self.handler.end_of_partition(partition);
                }
                Err(e) => {
                    let consecutive = self.error_state.record_error();
                    self.metrics.consumer_errors_total.inc();
                    self.metrics.consecutive_errors.set(consecutive as i64);

                    if is_fatal(&e) && !self.handler.is_ready() {
                        error!(error = %e, "Fatal Kafka error while replaying CDC backlog");
                        return Err(ProjectionError::Kafka(e));
                    }

                    let backoff = self.error_state.calculate_backoff();

                    if consecutive >= CRITICAL_ERROR_THRESHOLD {
                        error!(
                            consecutive_errors = consecutive,
                            backoff_secs = backoff.as_secs(),
                            time_since_success_secs =
                                self.error_state.time_since_success().as_secs(),
                            "CRITICAL: Kafka consumer experiencing persistent failures. \
                             Manual intervention may be required. Error: {}",
                            e
                        );
                    } else if consecutive >= UNHEALTHY_ERROR_THRESHOLD {
                        warn!(
                            consecutive_errors = consecutive,
                            backoff_secs = backoff.as_secs(),
                            "Kafka consumer unhealthy - multiple consecutive errors. Error: {}",
                            e
                        );
                    } else {
                        error!(
                            consecutive_errors = consecutive,
                            backoff_secs = backoff.as_secs(),
                            "Kafka consumer error (will retry with backoff): {}",
                            e
                        );
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                info!("CDC ingestion loop stopped during backoff");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }
}
