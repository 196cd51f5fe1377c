//! Observability infrastructure for the restarter
//!
//! Provides:
//! - Prometheus metrics describing the last reconciliation cycle
//! - Structured JSON logging with tracing
//!
//! Metrics live in a registry owned by [`RestarterMetrics`] rather than the
//! process-wide default registry, so every instance (and every test) has its
//! own set of series.

use crate::error::{CycleError, WorkloadError};
use crate::reconciler::CycleInfo;
use crate::workload::Workload;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Duration;
use tracing::{error, info, warn};

/// Buckets for the per-cycle workload count histograms
const COUNT_BUCKETS: &[f64] = &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];

/// Buckets for cycle duration (in seconds)
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Restarter metrics for Prometheus exposition
///
/// Clones share the same underlying series.
#[derive(Clone)]
pub struct RestarterMetrics {
    registry: Registry,
    restarts: IntGauge,
    ignores: IntGauge,
    skips: IntGauge,
    failures: IntGauge,
    restarts_histo: Histogram,
    ignores_histo: Histogram,
    skips_histo: Histogram,
    cycle_duration_seconds: Histogram,
    cycle_failures: IntCounter,
}

impl RestarterMetrics {
    /// Create the metrics and register them in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let restarts = IntGauge::new(
            "k8s_restarter_restarts",
            "The number of restarted apps in the last reconciliation",
        )?;
        let ignores = IntGauge::new(
            "k8s_restarter_ignores",
            "The number of ignored apps in the last reconciliation",
        )?;
        let skips = IntGauge::new(
            "k8s_restarter_skips",
            "The number of skipped apps in the last reconciliation",
        )?;
        let failures = IntGauge::new(
            "k8s_restarter_failures",
            "The number of apps that failed to reconcile in the last reconciliation",
        )?;
        let restarts_histo = count_histogram(
            "k8s_restarter_restarts_histo",
            "The number of restarted apps",
        )?;
        let ignores_histo =
            count_histogram("k8s_restarter_ignores_histo", "The number of ignored apps")?;
        let skips_histo =
            count_histogram("k8s_restarter_skips_histo", "The number of skipped apps")?;
        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "k8s_restarter_cycle_duration_seconds",
                "Time spent in one reconciliation cycle",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let cycle_failures = IntCounter::new(
            "k8s_restarter_cycle_failures_total",
            "Total number of reconciliation cycles that were abandoned",
        )?;

        registry.register(Box::new(restarts.clone()))?;
        registry.register(Box::new(ignores.clone()))?;
        registry.register(Box::new(skips.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(restarts_histo.clone()))?;
        registry.register(Box::new(ignores_histo.clone()))?;
        registry.register(Box::new(skips_histo.clone()))?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(cycle_failures.clone()))?;

        Ok(Self {
            registry,
            restarts,
            ignores,
            skips,
            failures,
            restarts_histo,
            ignores_histo,
            skips_histo,
            cycle_duration_seconds,
            cycle_failures,
        })
    }

    /// Registry to expose on `/metrics`
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish the counts of a completed cycle
    pub fn record_cycle(&self, info: &CycleInfo, elapsed: Duration) {
        self.restarts.set(info.restarted as i64);
        self.ignores.set(info.excluded as i64);
        self.skips.set(info.skipped as i64);
        self.failures.set(info.failed as i64);
        self.restarts_histo.observe(info.restarted as f64);
        self.ignores_histo.observe(info.excluded as f64);
        self.skips_histo.observe(info.skipped as f64);
        self.cycle_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// Count an abandoned cycle. The last-cycle gauges keep their values.
    pub fn record_cycle_failure(&self, elapsed: Duration) {
        self.cycle_failures.inc();
        self.cycle_duration_seconds.observe(elapsed.as_secs_f64());
    }
}

fn count_histogram(name: &str, help: &str) -> prometheus::Result<Histogram> {
    Histogram::with_opts(HistogramOpts::new(name, help).buckets(COUNT_BUCKETS.to_vec()))
}

/// Structured logger for restarter events
///
/// Every record carries the instance identity so logs from several replicas
/// can be told apart.
#[derive(Clone)]
pub struct StructuredLogger {
    identity: String,
}

impl StructuredLogger {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn log_startup(&self, version: &str, config_path: &str) {
        info!(
            event = "restarter_started",
            identity = %self.identity,
            version = %version,
            config = %config_path,
            "k8s-restarter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "restarter_shutdown",
            identity = %self.identity,
            reason = %reason,
            "k8s-restarter shutting down"
        );
    }

    pub fn log_cycle(&self, info: &CycleInfo, elapsed: Duration) {
        info!(
            event = "cycle_completed",
            identity = %self.identity,
            excluded = info.excluded,
            skipped = info.skipped,
            restarted = info.restarted,
            failed = info.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Reconciled"
        );
    }

    pub fn log_cycle_failure(&self, err: &CycleError) {
        error!(
            event = "cycle_failed",
            identity = %self.identity,
            error = %err,
            cause = ?std::error::Error::source(err).map(|s| s.to_string()),
            "Failed to reconcile"
        );
    }

    pub fn log_restart(&self, workload: &Workload) {
        info!(
            event = "workload_restarted",
            identity = %self.identity,
            kind = %workload.kind(),
            namespace = %workload.namespace,
            name = %workload.name,
            "Triggered rolling restart"
        );
    }

    pub fn log_workload_failure(&self, err: &WorkloadError) {
        warn!(
            event = "workload_failed",
            identity = %self.identity,
            reason = err.reason(),
            error = %err,
            cause = ?std::error::Error::source(err).map(|s| s.to_string()),
            "Failed to reconcile workload"
        );
    }

    pub fn log_leader_acquired(&self, lease: &str) {
        info!(
            event = "leader_acquired",
            identity = %self.identity,
            lease = %lease,
            "Start leading"
        );
    }

    pub fn log_leader_lost(&self, lease: &str) {
        warn!(
            event = "leader_lost",
            identity = %self.identity,
            lease = %lease,
            "Leader lost"
        );
    }

    pub fn log_new_leader(&self, lease: &str, holder: &str) {
        info!(
            event = "new_leader",
            identity = %self.identity,
            lease = %lease,
            holder = %holder,
            "New leader elected"
        );
    }
}
