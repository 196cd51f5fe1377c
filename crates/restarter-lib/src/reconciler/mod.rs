//! Restart decision and reconciliation cycle
//!
//! One cycle lists every Deployment, StatefulSet and DaemonSet, then walks
//! them in order:
//!
//! 1. drop workloads that are excluded by the include/exclude matchers
//! 2. skip workloads that are not ready (never restart mid-rollout)
//! 3. skip workloads whose last restart is younger than the restart interval
//! 4. write the restart marker on the pod template and persist it
//!
//! A failure to list any kind abandons the cycle. A failure on a single
//! workload is logged and the cycle carries on with the next one.

mod cycle;


pub use cycle::{CycleAggregator, CycleInfo, Outcome, SkipReason};

use crate::config::RestarterConfig;
use crate::error::{CycleError, WorkloadError};
use crate::observability::{RestarterMetrics, StructuredLogger};
use crate::selection::{exclusion, Exclusion};
use crate::store::WorkloadStore;
use crate::workload::{Workload, WorkloadKind};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// What should happen to a workload, before anything is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Exclude(Exclusion),
    Skip(SkipReason),
    Restart,
}

/// Decide what to do with `workload` at time `now`
pub fn decide(
    workload: &Workload,
    config: &RestarterConfig,
    now: DateTime<Utc>,
) -> Result<Decision, WorkloadError> {
    if let Some(reason) = exclusion(workload, &config.include, &config.exclude) {
        return Ok(Decision::Exclude(reason));
    }

    if !workload.is_ready() {
        return Ok(Decision::Skip(SkipReason::NotReady));
    }

    let last = match workload.last_restart() {
        Some(Ok(last)) => last,
        Some(Err(source)) => {
            return Err(WorkloadError::AnnotationParse {
                kind: workload.kind(),
                namespace: workload.namespace.clone(),
                name: workload.name.clone(),
                value: workload.restart_marker().unwrap_or_default().to_string(),
                source,
            })
        }
        // Never restarted by us: age counts from creation
        None => workload.creation_timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC),
    };

    if is_due(last, config.restart_interval, now) {
        Ok(Decision::Restart)
    } else {
        Ok(Decision::Skip(SkipReason::NotDue))
    }
}

/// True unless `last + interval` lies after `now`
fn is_due(last: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> bool {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|interval| last.checked_add_signed(interval))
        .map(|next| next <= now)
        .unwrap_or(false)
}

/// Runs reconciliation cycles against a workload store
pub struct Reconciler {
    store: Arc<dyn WorkloadStore>,
    config: Arc<RestarterConfig>,
    metrics: RestarterMetrics,
    logger: StructuredLogger,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn WorkloadStore>,
        config: Arc<RestarterConfig>,
        metrics: RestarterMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            logger,
        }
    }

    pub fn config(&self) -> &RestarterConfig {
        &self.config
    }

    /// Run one full cycle over all workload kinds
    pub async fn reconcile(&self) -> Result<CycleInfo, CycleError> {
        let start = Instant::now();

        let workloads = match self.list_all().await {
            Ok(workloads) => workloads,
            Err(err) => {
                self.metrics.record_cycle_failure(start.elapsed());
                self.logger.log_cycle_failure(&err);
                return Err(err);
            }
        };

        let mut aggregator = CycleAggregator::new(&self.metrics, &self.logger);
        for mut workload in workloads {
            let result = self.reconcile_workload(&mut workload, Utc::now()).await;
            aggregator.record(&result);
        }

        Ok(aggregator.finish(start.elapsed()))
    }

    /// List every kind; the first failure aborts so a cycle never covers
    /// only part of the kinds
    async fn list_all(&self) -> Result<Vec<Workload>, CycleError> {
        let mut workloads = Vec::new();
        for kind in WorkloadKind::ALL {
            let items = self
                .store
                .list(kind)
                .await
                .map_err(|source| CycleError::ListFailed { kind, source })?;
            workloads.extend(items);
        }
        Ok(workloads)
    }

    /// Apply the decision for a single workload, persisting a restart
    pub async fn reconcile_workload(
        &self,
        workload: &mut Workload,
        now: DateTime<Utc>,
    ) -> Result<Outcome, WorkloadError> {
        let kind = workload.kind();

        match decide(workload, &self.config, now)? {
            Decision::Exclude(reason) => {
                debug!(
                    kind = %kind,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    reason = reason.as_str(),
                    "excluded"
                );
                Ok(Outcome::Excluded)
            }
            Decision::Skip(SkipReason::NotReady) => {
                debug!(
                    kind = %kind,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    "not ready...skipping"
                );
                Ok(Outcome::Skipped(SkipReason::NotReady))
            }
            Decision::Skip(SkipReason::NotDue) => {
                debug!(
                    kind = %kind,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    "not scheduled for a restart"
                );
                Ok(Outcome::Skipped(SkipReason::NotDue))
            }
            Decision::Restart => {
                let previous = workload.set_restart_marker(now);
                if let Err(source) = self.store.update(workload).await {
                    workload.restore_restart_marker(previous);
                    return Err(WorkloadError::UpdateFailed {
                        kind,
                        namespace: workload.namespace.clone(),
                        name: workload.name.clone(),
                        source,
                    });
                }

                debug!(
                    kind = %kind,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    "restarted"
                );
                self.logger.log_restart(workload);
                Ok(Outcome::Restarted)
            }
        }
    }
}
