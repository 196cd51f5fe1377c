//! Conversion from Kubernetes API objects

use super::{Workload, WorkloadStatus};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

fn template_annotations(template: Option<&PodTemplateSpec>) -> BTreeMap<String, String> {
    template
        .and_then(|t| t.metadata.as_ref())
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default()
}

fn from_parts(
    metadata: ObjectMeta,
    status: WorkloadStatus,
    template: Option<&PodTemplateSpec>,
) -> Workload {
    Workload {
        namespace: metadata.namespace.unwrap_or_default(),
        name: metadata.name.unwrap_or_default(),
        labels: metadata.labels.unwrap_or_default(),
        annotations: metadata.annotations.unwrap_or_default(),
        creation_timestamp: metadata.creation_timestamp.map(|t| t.0),
        resource_version: metadata.resource_version,
        status,
        pod_template_annotations: template_annotations(template),
    }
}

impl From<Deployment> for Workload {
    fn from(deployment: Deployment) -> Self {
        let status = deployment.status.unwrap_or_default();
        let status = WorkloadStatus::Deployment {
            replicas: status.replicas.unwrap_or_default(),
            updated_replicas: status.updated_replicas.unwrap_or_default(),
            ready_replicas: status.ready_replicas.unwrap_or_default(),
            available_replicas: status.available_replicas.unwrap_or_default(),
        };
        let template = deployment.spec.as_ref().map(|s| &s.template);
        from_parts(deployment.metadata, status, template)
    }
}

impl From<StatefulSet> for Workload {
    fn from(statefulset: StatefulSet) -> Self {
        let status = statefulset.status.unwrap_or_default();
        let status = WorkloadStatus::StatefulSet {
            replicas: status.replicas,
            updated_replicas: status.updated_replicas.unwrap_or_default(),
            ready_replicas: status.ready_replicas.unwrap_or_default(),
            available_replicas: status.available_replicas.unwrap_or_default(),
        };
        let template = statefulset.spec.as_ref().map(|s| &s.template);
        from_parts(statefulset.metadata, status, template)
    }
}

impl From<DaemonSet> for Workload {
    fn from(daemonset: DaemonSet) -> Self {
        let status = daemonset.status.unwrap_or_default();
        let status = WorkloadStatus::DaemonSet {
            number_misscheduled: status.number_misscheduled,
            number_unavailable: status.number_unavailable.unwrap_or_default(),
            desired_number_scheduled: status.desired_number_scheduled,
            number_available: status.number_available.unwrap_or_default(),
            number_ready: status.number_ready,
        };
        let template = daemonset.spec.as_ref().map(|s| &s.template);
        from_parts(daemonset.metadata, status, template)
    }
}
