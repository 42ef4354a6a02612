//! Prometheus metrics for tablewal.
//!
//! Metrics are registered in a private [`Registry`] and rendered in text
//! format by [`Metrics::encode`]; exposing them is left to the embedder.

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tablewal_wal::{ReplayReport, RetentionReport, TableId, WalDiagnostic};

/// Replay duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

/// Prometheus metrics for the log subsystem.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Entries appended, by table and kind.
    pub entries_written_total: CounterVec,
    /// Entries seen during replay, by table and outcome.
    pub entries_replayed_total: CounterVec,
    /// Problems reported by replay or retention, by table and kind.
    pub diagnostics_total: CounterVec,
    /// Log files deleted, by table and reason.
    pub files_removed_total: CounterVec,
    /// Log files on disk, by table.
    pub log_files: GaugeVec,
    /// Replay duration, by table.
    pub replay_duration: HistogramVec,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let entries_written_total = CounterVec::new(
            Opts::new("tablewal_entries_written_total", "Log entries appended"),
            &["table", "kind"],
        )?;
        registry.register(Box::new(entries_written_total.clone()))?;

        let entries_replayed_total = CounterVec::new(
            Opts::new(
                "tablewal_entries_replayed_total",
                "Log entries seen during replay by outcome",
            ),
            &["table", "outcome"],
        )?;
        registry.register(Box::new(entries_replayed_total.clone()))?;

        let diagnostics_total = CounterVec::new(
            Opts::new(
                "tablewal_diagnostics_total",
                "Problems reported by replay and retention",
            ),
            &["table", "kind"],
        )?;
        registry.register(Box::new(diagnostics_total.clone()))?;

        let files_removed_total = CounterVec::new(
            Opts::new("tablewal_files_removed_total", "Log files deleted by reason"),
            &["table", "reason"],
        )?;
        registry.register(Box::new(files_removed_total.clone()))?;

        let log_files = GaugeVec::new(
            Opts::new("tablewal_log_files", "Log files currently on disk"),
            &["table"],
        )?;
        registry.register(Box::new(log_files.clone()))?;

        let replay_duration = HistogramVec::new(
            HistogramOpts::new("tablewal_replay_duration_seconds", "Replay duration in seconds")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["table"],
        )?;
        registry.register(Box::new(replay_duration.clone()))?;

        Ok(Self {
            registry,
            entries_written_total,
            entries_replayed_total,
            diagnostics_total,
            files_removed_total,
            log_files,
            replay_duration,
        })
    }

    /// Records one appended entry.
    pub fn record_write(&self, table: TableId, kind: &str) {
        let table = table.to_string();
        self.entries_written_total
            .with_label_values(&[table.as_str(), kind])
            .inc();
    }

    /// Records the outcome of a replay pass.
    pub fn record_replay(&self, table: TableId, report: &ReplayReport, seconds: f64) {
        let table = table.to_string();
        for (outcome, count) in [
            ("applied", report.entries_applied),
            ("skipped", report.entries_skipped),
            ("failed", report.entries_failed),
        ] {
            self.entries_replayed_total
                .with_label_values(&[table.as_str(), outcome])
                .inc_by(count as f64);
        }
        self.files_removed_total
            .with_label_values(&[table.as_str(), "replayed"])
            .inc_by(report.files_removed.len() as f64);
        self.record_diagnostics(&table, &report.diagnostics);
        self.replay_duration
            .with_label_values(&[table.as_str()])
            .observe(seconds);
    }

    /// Records the outcome of a retention pass.
    pub fn record_retention(&self, table: TableId, report: &RetentionReport) {
        let table = table.to_string();
        self.files_removed_total
            .with_label_values(&[table.as_str(), "expired"])
            .inc_by(report.files_removed.len() as f64);
        self.record_diagnostics(&table, &report.diagnostics);
    }

    /// Sets the number of log files on disk for a table.
    pub fn set_log_files(&self, table: TableId, count: usize) {
        let table = table.to_string();
        self.log_files
            .with_label_values(&[table.as_str()])
            .set(count as f64);
    }

    fn record_diagnostics(&self, table: &str, diagnostics: &[WalDiagnostic]) {
        for diag in diagnostics {
            self.diagnostics_total
                .with_label_values(&[table, diag.kind.as_str()])
                .inc();
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
