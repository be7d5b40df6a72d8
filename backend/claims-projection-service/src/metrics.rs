use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::OnceLock;

use crate::error::{ProjectionError, Result};

/// Metrics for projection ingestion and health
#[derive(Clone)]
pub struct ProjectionMetrics {
    /// Envelopes that changed the store (upserts and removals)
    pub envelopes_applied_total: IntCounter,
    /// Envelopes that removed a key
    pub tombstones_total: IntCounter,
    /// Envelopes dropped because their value could not be decoded
    pub decode_failures_total: IntCounter,
    /// Total number of Kafka consumer errors
    pub consumer_errors_total: IntCounter,
    /// Current consecutive error count (resets on success)
    pub consecutive_errors: IntGauge,
    /// Rows currently held by the projection
    pub store_rows: IntGauge,
    /// 1 once the backlog has been replayed, 0 otherwise
    pub projection_ready: IntGauge,
}

impl ProjectionMetrics {
    pub fn new(registry: &Registry) -> Self {
        let envelopes_applied_total = IntCounter::new(
            "projection_envelopes_applied_total",
            "Total number of CDC envelopes applied to the projection",
        )
        .expect("valid metric for projection_envelopes_applied_total");

        let tombstones_total = IntCounter::new(
            "projection_tombstones_total",
            "Total number of CDC envelopes that removed a row",
        )
        .expect("valid metric for projection_tombstones_total");

        let decode_failures_total = IntCounter::new(
            "projection_decode_failures_total",
            "Total number of CDC envelopes dropped as malformed",
        )
        .expect("valid metric for projection_decode_failures_total");

        let consumer_errors_total = IntCounter::new(
            "projection_consumer_errors_total",
            "Total number of Kafka consumer errors encountered",
        )
        .expect("valid metric for projection_consumer_errors_total");

        let consecutive_errors = IntGauge::new(
            "projection_consumer_consecutive_errors",
            "Current number of consecutive Kafka consumer errors",
        )
        .expect("valid metric for projection_consumer_consecutive_errors");

        let store_rows = IntGauge::new(
            "projection_store_rows",
            "Number of rows currently held by the projection",
        )
        .expect("valid metric for projection_store_rows");

        let projection_ready = IntGauge::new(
            "projection_ready",
            "Projection readiness (1 = backlog replayed, 0 = not ready)",
        )
        .expect("valid metric for projection_ready");

        // A name already taken in `registry` keeps its first collector
        for metric in [
            Box::new(envelopes_applied_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(tombstones_total.clone()),
            Box::new(decode_failures_total.clone()),
            Box::new(consumer_errors_total.clone()),
            Box::new(consecutive_errors.clone()),
            Box::new(store_rows.clone()),
            Box::new(projection_ready.clone()),
        ] {
            let _ = registry.register(metric);
        }

        Self {
            envelopes_applied_total,
            tombstones_total,
            decode_failures_total,
            consumer_errors_total,
            consecutive_errors,
            store_rows,
            projection_ready,
        }
    }
}

/// Shared collectors registered once in the process-wide default registry
impl Default for ProjectionMetrics {
    fn default() -> Self {
        static DEFAULT: OnceLock<ProjectionMetrics> = OnceLock::new();
        DEFAULT
            .get_or_init(|| Self::new(prometheus::default_registry()))
            .clone()
    }
}

/// Render every metric family in `registry` in the Prometheus text format.
///
/// Returns the content type alongside the body.
pub fn render(registry: &Registry) -> Result<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ProjectionError::Internal(format!("failed to encode metrics: {}", e)))?;

    Ok((encoder.format_type().to_string(), buffer))
}
