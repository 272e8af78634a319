//! In-process counters fed from the event bus.
//!
//! [`MetricsCollector`] keeps run totals and per-operation duration samples
//! and renders them in the Prometheus text exposition format. Serving that
//! text over HTTP is left to the embedding application.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::events::{EventBus, ProcessorEvent};

/// Histogram bucket bounds in seconds.
const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0];

#[derive(Debug, Default)]
struct Histogram {
    buckets: Vec<u64>,
    count: u64,
    sum: f64,
}

impl Histogram {
    fn observe(&mut self, seconds: f64) {
        if self.buckets.is_empty() {
            self.buckets = vec![0; DURATION_BUCKETS.len()];
        }
        for (slot, bound) in self.buckets.iter_mut().zip(DURATION_BUCKETS) {
            if seconds <= *bound {
                *slot += 1;
            }
        }
        self.count += 1;
        self.sum += seconds;
    }
}

/// Counters for one process lifetime.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    runs_total: AtomicU64,
    operations_total: AtomicU64,
    operations_success: AtomicU64,
    operations_failed: AtomicU64,
    files_processed: AtomicU64,
    files_failed: AtomicU64,
    script_executions: AtomicU64,
    script_failures: AtomicU64,
    frontmatter_errors: AtomicU64,
    durations: RwLock<BTreeMap<String, Histogram>>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub runs_total: u64,
    pub operations_total: u64,
    pub operations_success: u64,
    pub operations_failed: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub script_executions: u64,
    pub script_failures: u64,
    pub frontmatter_errors: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update counters for one event.
    pub fn record(&self, event: &ProcessorEvent) {
        match event {
            ProcessorEvent::RunStarted { .. } => {
                self.runs_total.fetch_add(1, Ordering::Relaxed);
            }
            ProcessorEvent::RunCompleted { .. } | ProcessorEvent::OperationStarted { .. } => {}
            ProcessorEvent::OperationFinished {
                operation,
                success,
                duration_ms,
                ..
            } => {
                self.operations_total.fetch_add(1, Ordering::Relaxed);
                if *success {
                    self.operations_success.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.operations_failed.fetch_add(1, Ordering::Relaxed);
                }
                if let Ok(mut durations) = self.durations.write() {
                    durations
                        .entry(operation.clone())
                        .or_default()
                        .observe(*duration_ms as f64 / 1000.0);
                }
            }
            ProcessorEvent::FileProcessed { .. } => {
                self.files_processed.fetch_add(1, Ordering::Relaxed);
            }
            ProcessorEvent::FileFailed { .. } => {
                self.files_failed.fetch_add(1, Ordering::Relaxed);
            }
            ProcessorEvent::ScriptExecuted { exit_code, .. } => {
                self.script_executions.fetch_add(1, Ordering::Relaxed);
                if *exit_code != Some(0) {
                    self.script_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            ProcessorEvent::FrontmatterError { .. } => {
                self.frontmatter_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Subscribe to `bus` and record events until the bus is dropped.
    pub fn spawn(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => collector.record(&envelope.payload),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Metrics collector lagged behind event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            operations_total: self.operations_total.load(Ordering::Relaxed),
            operations_success: self.operations_success.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            script_executions: self.script_executions.load(Ordering::Relaxed),
            script_failures: self.script_failures.load(Ordering::Relaxed),
            frontmatter_errors: self.frontmatter_errors.load(Ordering::Relaxed),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();
        let counters = [
            ("notescribe_runs_total", "Vault runs started", snap.runs_total),
            ("notescribe_operations_total", "Operation attempts", snap.operations_total),
            ("notescribe_operations_success_total", "Successful attempts", snap.operations_success),
            ("notescribe_operations_failed_total", "Failed attempts", snap.operations_failed),
            ("notescribe_files_processed_total", "Attachments completed", snap.files_processed),
            ("notescribe_files_failed_total", "Attachments failed or broken", snap.files_failed),
            ("notescribe_script_executions_total", "Script runs", snap.script_executions),
            ("notescribe_script_failures_total", "Script runs with non-zero exit", snap.script_failures),
            ("notescribe_frontmatter_errors_total", "Notes with unreadable frontmatter", snap.frontmatter_errors),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        let name = "notescribe_operation_duration_seconds";
        let _ = writeln!(out, "# HELP {} Operation attempt duration", name);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        if let Ok(durations) = self.durations.read() {
            for (operation, hist) in durations.iter() {
                for (bound, count) in DURATION_BUCKETS.iter().zip(&hist.buckets) {
                    let _ = writeln!(
                        out,
                        "{}_bucket{{operation=\"{}\",le=\"{}\"}} {}",
                        name, operation, bound, count
                    );
                }
                let _ = writeln!(
                    out,
                    "{}_bucket{{operation=\"{}\",le=\"+Inf\"}} {}",
                    name, operation, hist.count
                );
                let _ = writeln!(out, "{}_sum{{operation=\"{}\"}} {}", name, operation, hist.sum);
                let _ = writeln!(out, "{}_count{{operation=\"{}\"}} {}", name, operation, hist.count);
            }
        }
        out
    }
}
