//! Metrics collection and monitoring for the graph store
//!
//! Counters live in a crate-owned Prometheus registry so several services in
//! one process (tests, embedders) never collide on the default registry.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::time::Instant;

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry::new_custom(Some("graph_store".to_string()), None).unwrap_or_default());

/// Object and edge mutation counters
pub struct OperationMetrics {
    /// Objects created
    pub objects_created: IntCounter,
    /// Objects updated
    pub objects_updated: IntCounter,
    /// Objects deleted (soft or volatile)
    pub objects_deleted: IntCounter,
    /// Updates that changed nothing and were skipped
    pub noop_updates: IntCounter,
    /// Edges created
    pub edges_created: IntCounter,
    /// Edges deleted
    pub edges_deleted: IntCounter,
    /// Mutations rejected by a unique constraint
    pub unique_conflicts: IntCounter,
    /// Duration of service operations in seconds
    pub operation_duration: Histogram,
}

/// Event log and queue counters
pub struct EventMetrics {
    /// Events written to the durable log
    pub persisted: IntCounter,
    /// Events handed to the queue
    pub published: IntCounter,
    /// Queue sends that failed after the event was persisted
    pub publish_failures: IntCounter,
}

/// Centralized metrics collection for all components
pub struct Metrics {
    /// Mutation metrics
    pub operations: OperationMetrics,
    /// Event metrics
    pub events: EventMetrics,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    REGISTRY.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> prometheus::Result<Self> {
        let operation_duration = Histogram::with_opts(
            HistogramOpts::new("operation_duration_seconds", "Duration of graph operations in seconds")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        REGISTRY.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            operations: OperationMetrics {
                objects_created: counter("objects_created_total", "Total number of objects created")?,
                objects_updated: counter("objects_updated_total", "Total number of objects updated")?,
                objects_deleted: counter("objects_deleted_total", "Total number of objects deleted")?,
                noop_updates: counter("noop_updates_total", "Total number of updates without changes")?,
                edges_created: counter("edges_created_total", "Total number of edges created")?,
                edges_deleted: counter("edges_deleted_total", "Total number of edges deleted")?,
                unique_conflicts: counter("unique_conflicts_total", "Total number of unique constraint violations")?,
                operation_duration,
            },
            events: EventMetrics {
                persisted: counter("events_persisted_total", "Total number of events persisted")?,
                published: counter("events_published_total", "Total number of events published")?,
                publish_failures: counter("event_publish_failures_total", "Total number of failed event publishes")?,
            },
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> = Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
        &INSTANCE
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: &Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Register all metrics; call once during startup
pub fn init_registry() {
    let _ = Metrics::global();
}

/// Get the Prometheus registry
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect all metrics in the Prometheus text exposition format
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_exported() {
        init_registry();
        let metrics = Metrics::global();
        metrics.operations.objects_created.inc();
        Timer::start(&metrics.operations.operation_duration).finish();

        let text = collect_metrics();
        assert!(text.contains("graph_store_objects_created_total"));
        assert!(text.contains("graph_store_operation_duration_seconds"));
    }
}
