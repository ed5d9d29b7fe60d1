//! Observability: tracing setup and in-process counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber
///
/// `RUST_LOG` wins over `default_filter`. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Metrics handle for recording counters/gauges
#[derive(Debug, Default)]
pub struct Metrics {
    records_appended: AtomicU64,
    records_edited: AtomicU64,
    records_deleted: AtomicU64,
    streams_finalized: AtomicU64,
    completed_removed: AtomicU64,
    operations_failed: AtomicU64,
    handles_opened: AtomicU64,
    handles_evicted: AtomicU64,
    open_handles: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_edited(&self, lines: usize) {
        self.records_edited.fetch_add(lines as u64, Ordering::Relaxed);
        tracing::debug!(counter = "records_edited", lines, "Metric incremented");
    }

    pub fn records_deleted(&self, lines: usize) {
        self.records_deleted.fetch_add(lines as u64, Ordering::Relaxed);
        tracing::debug!(counter = "records_deleted", lines, "Metric incremented");
    }

    pub fn stream_finalized(&self) {
        self.streams_finalized.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "streams_finalized", "Metric incremented");
    }

    pub fn completed_removed(&self) {
        self.completed_removed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "completed_removed", "Metric incremented");
    }

    pub fn operation_failed(&self) {
        self.operations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "operations_failed", "Metric incremented");
    }

    pub fn handle_opened(&self) {
        self.handles_opened.fetch_add(1, Ordering::Relaxed);
        self.open_handles.fetch_add(1, Ordering::Relaxed);
    }

    /// A cached handle was closed; `idle` marks eviction by the idle timer
    pub fn handle_closed(&self, idle: bool) {
        if idle {
            self.handles_evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.open_handles.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_edited: self.records_edited.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            streams_finalized: self.streams_finalized.load(Ordering::Relaxed),
            completed_removed: self.completed_removed.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            handles_opened: self.handles_opened.load(Ordering::Relaxed),
            handles_evicted: self.handles_evicted.load(Ordering::Relaxed),
            open_handles: self.open_handles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub records_appended: u64,
    pub records_edited: u64,
    pub records_deleted: u64,
    pub streams_finalized: u64,
    pub completed_removed: u64,
    pub operations_failed: u64,
    pub handles_opened: u64,
    pub handles_evicted: u64,
    pub open_handles: u64,
}
