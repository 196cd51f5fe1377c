//! Uniform view over the workload kinds the restarter manages
//!
//! Deployments, StatefulSets and DaemonSets are converted into a
//! [`Workload`] when they are listed. The decision logic only ever sees this
//! type, so it can be exercised without a cluster.

mod convert;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation on the pod template recording the last restart
pub const RESTARTED_AT_ANNOTATION: &str = "k8s-restarter.kubernetes.io/restartedAt";

/// Kind of a workload controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    /// All kinds, in the order a cycle lists them
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rollout status of a workload, one variant per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadStatus {
    Deployment {
        replicas: i32,
        updated_replicas: i32,
        ready_replicas: i32,
        available_replicas: i32,
    },
    StatefulSet {
        replicas: i32,
        updated_replicas: i32,
        ready_replicas: i32,
        available_replicas: i32,
    },
    DaemonSet {
        number_misscheduled: i32,
        number_unavailable: i32,
        desired_number_scheduled: i32,
        number_available: i32,
        number_ready: i32,
    },
}

impl WorkloadStatus {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadStatus::Deployment { .. } => WorkloadKind::Deployment,
            WorkloadStatus::StatefulSet { .. } => WorkloadKind::StatefulSet,
            WorkloadStatus::DaemonSet { .. } => WorkloadKind::DaemonSet,
        }
    }

    /// Whether the workload may be restarted right now.
    ///
    /// The StatefulSet predicate is true while an update is still rolling
    /// out, the opposite of the Deployment one. This matches the behaviour
    /// operators already depend on and is kept as is.
    pub fn is_ready(&self) -> bool {
        match *self {
            WorkloadStatus::Deployment {
                replicas,
                updated_replicas,
                ready_replicas,
                available_replicas,
            } => replicas == updated_replicas && ready_replicas == available_replicas,
            WorkloadStatus::StatefulSet {
                replicas,
                updated_replicas,
                ready_replicas,
                available_replicas,
            } => replicas != updated_replicas || ready_replicas != available_replicas,
            WorkloadStatus::DaemonSet {
                number_misscheduled,
                number_unavailable,
                desired_number_scheduled,
                number_available,
                number_ready,
            } => {
                number_misscheduled == 0
                    && number_unavailable == 0
                    && desired_number_scheduled == number_available
                    && desired_number_scheduled == number_ready
            }
        }
    }
}

/// A workload controller as seen by one reconciliation cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Version the object was listed at; updates are conditional on it
    pub resource_version: Option<String>,
    pub status: WorkloadStatus,
    pub pod_template_annotations: BTreeMap<String, String>,
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        self.status.kind()
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    /// Raw value of the restart marker, if the pod template carries one
    pub fn restart_marker(&self) -> Option<&str> {
        self.pod_template_annotations
            .get(RESTARTED_AT_ANNOTATION)
            .map(String::as_str)
    }

    /// Parse the restart marker as an RFC3339 timestamp
    pub fn last_restart(&self) -> Option<Result<DateTime<Utc>, chrono::ParseError>> {
        self.restart_marker().map(|value| {
            DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc))
        })
    }

    /// Record a restart at `at`, returning the previous marker value
    pub fn set_restart_marker(&mut self, at: DateTime<Utc>) -> Option<String> {
        self.pod_template_annotations.insert(
            RESTARTED_AT_ANNOTATION.to_string(),
            format_marker(at),
        )
    }

    /// Put the marker back to what it was before [`Workload::set_restart_marker`]
    pub fn restore_restart_marker(&mut self, previous: Option<String>) {
        match previous {
            Some(value) => {
                self.pod_template_annotations
                    .insert(RESTARTED_AT_ANNOTATION.to_string(), value);
            }
            None => {
                self.pod_template_annotations.remove(RESTARTED_AT_ANNOTATION);
            }
        }
    }
}

/// RFC3339 with second precision, the format stored in the marker
pub fn format_marker(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn deployment(namespace: &str, name: &str) -> Workload {
        Workload {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            creation_timestamp: None,
            resource_version: Some("1".to_string()),
            status: WorkloadStatus::Deployment {
                replicas: 3,
                updated_replicas: 3,
                ready_replicas: 3,
                available_replicas: 3,
            },
            pod_template_annotations: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut workload: Workload, labels: &[(&str, &str)]) -> Workload {
        workload.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        workload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_deployment_ready_when_rollout_settled() {
        let status = WorkloadStatus::Deployment {
            replicas: 3,
            updated_replicas: 3,
            ready_replicas: 3,
            available_replicas: 3,
        };
        assert!(status.is_ready());
    }

    #[test]
    fn test_deployment_not_ready_during_rollout() {
        let status = WorkloadStatus::Deployment {
            replicas: 3,
            updated_replicas: 2,
            ready_replicas: 3,
            available_replicas: 3,
        };
        assert!(!status.is_ready());

        let status = WorkloadStatus::Deployment {
            replicas: 3,
            updated_replicas: 3,
            ready_replicas: 3,
            available_replicas: 2,
        };
        assert!(!status.is_ready());
    }

    #[test]
    fn test_statefulset_ready_only_while_updating() {
        let settled = WorkloadStatus::StatefulSet {
            replicas: 2,
            updated_replicas: 2,
            ready_replicas: 2,
            available_replicas: 2,
        };
        assert!(!settled.is_ready());

        let updating = WorkloadStatus::StatefulSet {
            replicas: 2,
            updated_replicas: 1,
            ready_replicas: 2,
            available_replicas: 2,
        };
        assert!(updating.is_ready());
    }

    fn daemonset_status(
        misscheduled: i32,
        unavailable: i32,
        desired: i32,
        available: i32,
        ready: i32,
    ) -> WorkloadStatus {
        WorkloadStatus::DaemonSet {
            number_misscheduled: misscheduled,
            number_unavailable: unavailable,
            desired_number_scheduled: desired,
            number_available: available,
            number_ready: ready,
        }
    }

    #[test]
    fn test_daemonset_readiness() {
        assert!(daemonset_status(0, 0, 4, 4, 4).is_ready());
        assert!(!daemonset_status(1, 0, 4, 4, 4).is_ready());
        assert!(!daemonset_status(0, 1, 4, 3, 4).is_ready());
        assert!(!daemonset_status(0, 0, 4, 4, 3).is_ready());
    }

    #[test]
    fn test_restart_marker_round_trip_truncates_to_seconds() {
        let mut workload = fixtures::deployment("default", "web");
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 15).unwrap()
            + Duration::milliseconds(750);

        assert!(workload.set_restart_marker(at).is_none());
        assert_eq!(workload.restart_marker(), Some("2026-03-01T12:30:15Z"));

        let read_back = workload.last_restart().unwrap().unwrap();
        assert_eq!(read_back.timestamp(), at.timestamp());
    }

    #[test]
    fn test_last_restart_accepts_offsets() {
        let mut workload = fixtures::deployment("default", "web");
        workload.pod_template_annotations.insert(
            RESTARTED_AT_ANNOTATION.to_string(),
            "2026-03-01T14:30:15+02:00".to_string(),
        );

        let last = workload.last_restart().unwrap().unwrap();
        assert_eq!(last, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 15).unwrap());
    }

    #[test]
    fn test_last_restart_reports_garbage() {
        let mut workload = fixtures::deployment("default", "web");
        workload
            .pod_template_annotations
            .insert(RESTARTED_AT_ANNOTATION.to_string(), "yesterday".to_string());

        assert!(workload.last_restart().unwrap().is_err());
    }

    #[test]
    fn test_restore_restart_marker() {
        let mut workload = fixtures::deployment("default", "web");
        let previous = workload.set_restart_marker(Utc::now());
        workload.restore_restart_marker(previous);
        assert!(workload.restart_marker().is_none());

        workload
            .pod_template_annotations
            .insert(RESTARTED_AT_ANNOTATION.to_string(), "old".to_string());
        let previous = workload.set_restart_marker(Utc::now());
        workload.restore_restart_marker(previous);
        assert_eq!(workload.restart_marker(), Some("old"));
    }
}
