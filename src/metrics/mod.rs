use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for the aggregate store
// ============================================================================
//
// Provides metrics for:
// - Saves and their outcome (committed, conflict, failed)
// - Events appended and replayed per aggregate type
// - Snapshots written
// - Event bus dispatch and handler failures
//
// The registry is owned here; `render` produces the text exposition format.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Store Metrics
    pub saves_total: IntCounterVec,
    pub events_appended: IntCounterVec,
    pub concurrency_conflicts: IntCounterVec,
    pub snapshots_written: IntCounterVec,
    pub events_replayed: HistogramVec,

    // Event Bus Metrics
    pub events_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let saves_total = IntCounterVec::new(
            Opts::new("aggregate_saves_total", "Save attempts by outcome"),
            &["aggregate_type", "outcome"],
        )?;
        registry.register(Box::new(saves_total.clone()))?;

        let events_appended = IntCounterVec::new(
            Opts::new("aggregate_events_appended_total", "Events committed to the log"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let concurrency_conflicts = IntCounterVec::new(
            Opts::new("aggregate_concurrency_conflicts_total", "Saves rejected by the version check"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        let snapshots_written = IntCounterVec::new(
            Opts::new("aggregate_snapshots_written_total", "Snapshots committed with a save"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(snapshots_written.clone()))?;

        let events_replayed = HistogramVec::new(
            HistogramOpts::new("aggregate_events_replayed", "Events replayed per load")
                .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0]),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(events_replayed.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("event_bus_published_total", "Events delivered to every subscriber"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("event_bus_publish_failures_total", "Publishes aborted by a handler or missing subscriber"),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        Ok(Self {
            registry,
            saves_total,
            events_appended,
            concurrency_conflicts,
            snapshots_written,
            events_replayed,
            events_published,
            publish_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    pub fn record_save(&self, aggregate_type: &str, outcome: SaveOutcome) {
        self.saves_total
            .with_label_values(&[aggregate_type, outcome.as_str()])
            .inc();
        if outcome == SaveOutcome::Conflict {
            self.concurrency_conflicts.with_label_values(&[aggregate_type]).inc();
        }
    }

    pub fn record_commit(&self, aggregate_type: &str, event_count: usize, snapshot_written: bool) {
        self.events_appended
            .with_label_values(&[aggregate_type])
            .inc_by(event_count as u64);
        if snapshot_written {
            self.snapshots_written.with_label_values(&[aggregate_type]).inc();
        }
    }

    pub fn record_replay(&self, aggregate_type: &str, event_count: usize) {
        self.events_replayed
            .with_label_values(&[aggregate_type])
            .observe(event_count as f64);
    }

    pub fn record_publish(&self, event_type: &str, success: bool) {
        if success {
            self.events_published.with_label_values(&[event_type]).inc();
        } else {
            self.publish_failures.with_label_values(&[event_type]).inc();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Committed,
    Conflict,
    Failed,
}

impl SaveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveOutcome::Committed => "committed",
            SaveOutcome::Conflict => "conflict",
            SaveOutcome::Failed => "failed",
        }
    }
}
