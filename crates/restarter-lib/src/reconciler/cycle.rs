//! Per-cycle outcome accounting

use crate::error::WorkloadError;
use crate::observability::{RestarterMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counts gathered during one reconciliation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleInfo {
    pub excluded: usize,
    pub skipped: usize,
    pub restarted: usize,
    /// Workloads whose processing failed; not counted in the other fields
    pub failed: usize,
}

/// Why a selected workload was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotReady,
    NotDue,
}

/// What happened to a single workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Excluded,
    Skipped(SkipReason),
    Restarted,
}

/// Tallies outcomes while a cycle runs and reports them when it ends
pub struct CycleAggregator<'a> {
    info: CycleInfo,
    metrics: &'a RestarterMetrics,
    logger: &'a StructuredLogger,
}

impl<'a> CycleAggregator<'a> {
    pub fn new(metrics: &'a RestarterMetrics, logger: &'a StructuredLogger) -> Self {
        Self {
            info: CycleInfo::default(),
            metrics,
            logger,
        }
    }

    pub fn record(&mut self, result: &Result<Outcome, WorkloadError>) {
        match result {
            Ok(Outcome::Excluded) => self.info.excluded += 1,
            Ok(Outcome::Skipped(_)) => self.info.skipped += 1,
            Ok(Outcome::Restarted) => self.info.restarted += 1,
            Err(err) => {
                self.info.failed += 1;
                self.logger.log_workload_failure(err);
            }
        }
    }

    /// Publish the counts to the metrics sink and the log
    pub fn finish(self, elapsed: Duration) -> CycleInfo {
        self.metrics.record_cycle(&self.info, elapsed);
        self.logger.log_cycle(&self.info, elapsed);
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::workload::WorkloadKind;

    #[test]
    fn test_aggregator_counts_each_outcome() {
        let metrics = RestarterMetrics::new().unwrap();
        let logger = StructuredLogger::new("test");
        let mut aggregator = CycleAggregator::new(&metrics, &logger);

        aggregator.record(&Ok(Outcome::Excluded));
        aggregator.record(&Ok(Outcome::Excluded));
        aggregator.record(&Ok(Outcome::Skipped(SkipReason::NotReady)));
        aggregator.record(&Ok(Outcome::Skipped(SkipReason::NotDue)));
        aggregator.record(&Ok(Outcome::Restarted));
        aggregator.record(&Err(WorkloadError::UpdateFailed {
            kind: WorkloadKind::Deployment,
            namespace: "default".to_string(),
            name: "web".to_string(),
            source: StoreError::Timeout {
                operation: "update".to_string(),
                after: Duration::from_secs(1),
            },
        }));

        let info = aggregator.finish(Duration::from_millis(5));
        assert_eq!(
            info,
            CycleInfo {
                excluded: 2,
                skipped: 2,
                restarted: 1,
                failed: 1,
            }
        );
    }
}
