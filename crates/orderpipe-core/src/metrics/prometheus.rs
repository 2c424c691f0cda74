//! Prometheus metrics export.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for batch enrichment duration.
/// Converts to seconds: [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
const ENRICH_DURATION_BUCKETS_MS: [u64; 7] = [10, 50, 100, 500, 1000, 5000, 30000];

/// Error types for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Stream read/decode errors
    Stream,
    /// Per-record enrichment failures (timeouts, scorer errors)
    Enrichment,
    /// Bus emission failures
    Publish,
    /// Sink delivery failures
    Sink,
}

impl ErrorType {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorType::Stream => "stream",
            ErrorType::Enrichment => "enrichment",
            ErrorType::Publish => "publish",
            ErrorType::Sink => "sink",
        }
    }

    const ALL: [ErrorType; 4] = [
        ErrorType::Stream,
        ErrorType::Enrichment,
        ErrorType::Publish,
        ErrorType::Sink,
    ];
}

/// Pipeline metrics with counters, gauges, and a histogram.
pub struct PipelineMetrics {
    // === COUNTERS ===
    records_read_total: AtomicU64,
    records_filtered_out_total: AtomicU64,
    batches_total: AtomicU64,
    enrichment_calls_total: AtomicU64,
    bisect_splits_total: AtomicU64,
    events_published_total: AtomicU64,
    publish_retries_total: AtomicU64,
    dead_letters_total: AtomicU64,
    routed_deliveries_total: AtomicU64,
    unrouted_events_total: AtomicU64,

    errors_total: AtomicU64,
    errors_by_type: [AtomicU64; 4],

    // === GAUGES ===
    in_flight_batches: AtomicU64,
    checkpoint_lag: AtomicU64,

    // === HISTOGRAM: batch_enrichment_duration_seconds ===
    enrich_duration_sum_ms: AtomicU64,
    enrich_duration_count: AtomicU64,
    /// Buckets: [0.01s, 0.05s, 0.1s, 0.5s, 1s, 5s, 30s, +Inf]
    enrich_duration_buckets: [AtomicU64; 8],
}

impl PipelineMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            records_read_total: AtomicU64::new(0),
            records_filtered_out_total: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            enrichment_calls_total: AtomicU64::new(0),
            bisect_splits_total: AtomicU64::new(0),
            events_published_total: AtomicU64::new(0),
            publish_retries_total: AtomicU64::new(0),
            dead_letters_total: AtomicU64::new(0),
            routed_deliveries_total: AtomicU64::new(0),
            unrouted_events_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            errors_by_type: Default::default(),
            in_flight_batches: AtomicU64::new(0),
            checkpoint_lag: AtomicU64::new(0),
            enrich_duration_sum_ms: AtomicU64::new(0),
            enrich_duration_count: AtomicU64::new(0),
            enrich_duration_buckets: Default::default(),
        }
    }

    // === COUNTER RECORDING ===

    /// Record a change record read from the stream.
    pub fn record_read(&self) {
        self.records_read_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a change record dropped by the filter.
    pub fn record_filtered_out(&self) {
        self.records_filtered_out_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch emitted by the batcher.
    pub fn record_batch(&self) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record scoring calls made for one invocation.
    pub fn record_enrichment_calls(&self, calls: usize) {
        self.enrichment_calls_total
            .fetch_add(calls as u64, Ordering::Relaxed);
    }

    /// Record a bisection split.
    pub fn record_bisect_split(&self) {
        self.bisect_splits_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event published on the bus.
    pub fn record_published(&self) {
        self.events_published_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retried bus emission.
    pub fn record_publish_retry(&self) {
        self.publish_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record records sent to the dead-letter path.
    pub fn record_dead_letters(&self, count: usize) {
        self.dead_letters_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record sink deliveries for one routed event.
    pub fn record_routed(&self, deliveries: usize) {
        if deliveries == 0 {
            self.unrouted_events_total.fetch_add(1, Ordering::Relaxed);
        }
        self.routed_deliveries_total
            .fetch_add(deliveries as u64, Ordering::Relaxed);
    }

    /// Record an error with a type label.
    pub fn record_error(&self, error_type: ErrorType) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        self.errors_by_type[error_type as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Record one (sub-)batch enrichment duration.
    pub fn record_enrichment_duration(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.enrich_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.enrich_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in ENRICH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.enrich_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.enrich_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    /// Batch entered enrichment.
    pub fn batch_started(&self) {
        self.in_flight_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Batch left enrichment.
    pub fn batch_finished(&self) {
        let _ = self
            .in_flight_batches
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Update records read but not yet committed.
    pub fn set_checkpoint_lag(&self, lag: u64) {
        self.checkpoint_lag.store(lag, Ordering::Relaxed);
    }

    // === GETTERS ===

    /// Total records read.
    pub fn records_read_total(&self) -> u64 {
        self.records_read_total.load(Ordering::Relaxed)
    }

    /// Total records dropped by the filter.
    pub fn records_filtered_out_total(&self) -> u64 {
        self.records_filtered_out_total.load(Ordering::Relaxed)
    }

    /// Total batches.
    pub fn batches_total(&self) -> u64 {
        self.batches_total.load(Ordering::Relaxed)
    }

    /// Total scoring calls, including bisection retries.
    pub fn enrichment_calls_total(&self) -> u64 {
        self.enrichment_calls_total.load(Ordering::Relaxed)
    }

    /// Total bisection splits.
    pub fn bisect_splits_total(&self) -> u64 {
        self.bisect_splits_total.load(Ordering::Relaxed)
    }

    /// Total events published.
    pub fn events_published_total(&self) -> u64 {
        self.events_published_total.load(Ordering::Relaxed)
    }

    /// Total bus emission retries.
    pub fn publish_retries_total(&self) -> u64 {
        self.publish_retries_total.load(Ordering::Relaxed)
    }

    /// Total dead-lettered records.
    pub fn dead_letters_total(&self) -> u64 {
        self.dead_letters_total.load(Ordering::Relaxed)
    }

    /// Total sink deliveries.
    pub fn routed_deliveries_total(&self) -> u64 {
        self.routed_deliveries_total.load(Ordering::Relaxed)
    }

    /// Events that matched no rule.
    pub fn unrouted_events_total(&self) -> u64 {
        self.unrouted_events_total.load(Ordering::Relaxed)
    }

    /// Total errors.
    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Errors of one type.
    pub fn errors_by_type(&self, error_type: ErrorType) -> u64 {
        self.errors_by_type[error_type as usize].load(Ordering::Relaxed)
    }

    /// Batches currently in enrichment.
    pub fn in_flight_batches(&self) -> u64 {
        self.in_flight_batches.load(Ordering::Relaxed)
    }

    /// Records read but not yet committed.
    pub fn checkpoint_lag(&self) -> u64 {
        self.checkpoint_lag.load(Ordering::Relaxed)
    }

    /// Get enrichment duration histogram data for Prometheus export.
    pub fn enrichment_duration_histogram(&self) -> DurationHistogram {
        let mut buckets = [(0.0, 0); 7];
        for (i, &bucket_ms) in ENRICH_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.enrich_duration_buckets[i].load(Ordering::Relaxed),
            );
        }
        DurationHistogram {
            sum_seconds: self.enrich_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.enrich_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.enrich_duration_buckets[7].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use orderpipe_core::metrics::PipelineMetrics;
    ///
    /// let metrics = PipelineMetrics::new();
    /// metrics.record_published();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("orderpipe_events_published_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix("orderpipe")
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(4096);

        // === COUNTERS ===
        let counters = [
            (
                "records_read_total",
                "Change records read from the stream",
                self.records_read_total(),
            ),
            (
                "records_filtered_out_total",
                "Change records dropped by the filter",
                self.records_filtered_out_total(),
            ),
            ("batches_total", "Batches emitted by the batcher", self.batches_total()),
            (
                "enrichment_calls_total",
                "Scoring calls including bisection retries",
                self.enrichment_calls_total(),
            ),
            (
                "bisect_splits_total",
                "Failed subsets split by bisection",
                self.bisect_splits_total(),
            ),
            (
                "events_published_total",
                "Enriched events published on the bus",
                self.events_published_total(),
            ),
            (
                "publish_retries_total",
                "Bus emission retries",
                self.publish_retries_total(),
            ),
            (
                "dead_letters_total",
                "Records sent to the dead-letter path",
                self.dead_letters_total(),
            ),
            (
                "routed_deliveries_total",
                "Events delivered to sinks",
                self.routed_deliveries_total(),
            ),
            (
                "unrouted_events_total",
                "Published events that matched no rule",
                self.unrouted_events_total(),
            ),
            ("errors_total", "Total errors encountered", self.errors_total()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {prefix}_{name} {help}");
            let _ = writeln!(output, "# TYPE {prefix}_{name} counter");
            let _ = writeln!(output, "{prefix}_{name} {value}");
            output.push('\n');
        }

        let _ = writeln!(output, "# HELP {prefix}_errors Errors by type");
        let _ = writeln!(output, "# TYPE {prefix}_errors counter");
        for error_type in ErrorType::ALL {
            let _ = writeln!(
                output,
                "{prefix}_errors{{type=\"{}\"}} {}",
                error_type.as_label(),
                self.errors_by_type(error_type)
            );
        }
        output.push('\n');

        // === GAUGES ===
        let gauges = [
            (
                "in_flight_batches",
                "Batches currently in enrichment",
                self.in_flight_batches(),
            ),
            (
                "checkpoint_lag",
                "Records read but not yet committed",
                self.checkpoint_lag(),
            ),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP {prefix}_{name} {help}");
            let _ = writeln!(output, "# TYPE {prefix}_{name} gauge");
            let _ = writeln!(output, "{prefix}_{name} {value}");
            output.push('\n');
        }

        // === HISTOGRAM ===
        let hist = self.enrichment_duration_histogram();
        let name = format!("{prefix}_batch_enrichment_duration_seconds");
        let _ = writeln!(output, "# HELP {name} Duration of batch enrichment invocations");
        let _ = writeln!(output, "# TYPE {name} histogram");
        for (le, count) in &hist.buckets {
            let _ = writeln!(output, "{name}_bucket{{le=\"{le}\"}} {count}");
        }
        let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {}", hist.inf_bucket);
        let _ = writeln!(output, "{name}_sum {}", hist.sum_seconds);
        let _ = writeln!(output, "{name}_count {}", hist.count);

        output
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram snapshot for export.
#[derive(Debug, Clone)]
pub struct DurationHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Number of observations
    pub count: u64,
    /// (upper bound in seconds, cumulative count)
    pub buckets: [(f64, u64); 7],
    /// +Inf bucket count
    pub inf_bucket: u64,
}
