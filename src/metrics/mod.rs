// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::event_sourcing::core::{EventStoreError, Version};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the event store
// ============================================================================
//
// - Appends: committed events, outcome per save, save latency
// - Conflicts: optimistic concurrency rejections
// - Global sequence: allocations and the highest value handed out
// - Reads: query pages and records fetched
//
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub events_appended: IntCounterVec,
    pub saves: IntCounterVec,
    pub save_duration: HistogramVec,
    pub concurrency_conflicts: IntCounter,

    pub global_versions_allocated: IntCounter,
    pub last_global_version: IntGauge,

    pub query_pages: IntCounter,
    pub records_fetched: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_appended = IntCounterVec::new(
            Opts::new("event_store_events_appended_total", "Events durably appended"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let saves = IntCounterVec::new(
            Opts::new("event_store_saves_total", "Save calls by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(saves.clone()))?;

        let save_duration = HistogramVec::new(
            HistogramOpts::new("event_store_save_duration_seconds", "Save latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(save_duration.clone()))?;

        let concurrency_conflicts = IntCounter::new(
            "event_store_concurrency_conflicts_total",
            "Saves rejected by optimistic concurrency control",
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        let global_versions_allocated = IntCounter::new(
            "event_store_global_versions_allocated_total",
            "Global versions consumed, including those lost to aborted saves",
        )?;
        registry.register(Box::new(global_versions_allocated.clone()))?;

        let last_global_version = IntGauge::new(
            "event_store_last_global_version",
            "Highest global version allocated by this process",
        )?;
        registry.register(Box::new(last_global_version.clone()))?;

        let query_pages = IntCounter::new("event_store_query_pages_total", "Query pages fetched")?;
        registry.register(Box::new(query_pages.clone()))?;

        let records_fetched = IntCounter::new(
            "event_store_records_fetched_total",
            "Records returned by range queries",
        )?;
        registry.register(Box::new(records_fetched.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            saves,
            save_duration,
            concurrency_conflicts,
            global_versions_allocated,
            last_global_version,
            query_pages,
            records_fetched,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_save(
        &self,
        aggregate_type: &str,
        event_count: usize,
        duration_secs: f64,
        result: &Result<(), EventStoreError>,
    ) {
        let outcome = match result {
            Ok(()) => {
                self.events_appended
                    .with_label_values(&[aggregate_type])
                    .inc_by(event_count as u64);
                "committed"
            }
            Err(err) if err.is_concurrency() => {
                self.concurrency_conflicts.inc();
                "conflict"
            }
            Err(EventStoreError::Cancelled) | Err(EventStoreError::Timeout) => "cancelled",
            Err(_) => "error",
        };
        self.saves.with_label_values(&[outcome]).inc();
        self.save_duration.with_label_values(&[outcome]).observe(duration_secs);
    }

    pub fn record_global_version(&self, global_version: Version) {
        self.global_versions_allocated.inc();
        let value = i64::try_from(global_version).unwrap_or(i64::MAX);
        if value > self.last_global_version.get() {
            self.last_global_version.set(value);
        }
    }

    pub fn record_query_page(&self, record_count: usize) {
        self.query_pages.inc();
        self.records_fetched.inc_by(record_count as u64);
    }
}
