//! Access to the workloads stored in the cluster
//!
//! [`WorkloadStore`] is the seam between the restart decision and the
//! Kubernetes API. [`KubeWorkloadStore`] is the real implementation; tests
//! use an in-memory one.

use crate::error::{BoxError, StoreError};
use crate::workload::{Workload, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::api::{ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Trait for reading and writing workloads
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// List every workload of `kind` across all namespaces
    async fn list(&self, kind: WorkloadKind) -> Result<Vec<Workload>, StoreError>;

    /// Persist the pod-template annotations of `workload`
    async fn update(&self, workload: &Workload) -> Result<(), StoreError>;
}

/// Build a Kubernetes client from an explicit kubeconfig, or infer one
/// (in-cluster service account or the default kubeconfig).
pub async fn build_client(kubeconfig: Option<&Path>) -> Result<Client, BoxError> {
    let config = match kubeconfig {
        Some(path) => {
            info!(kubeconfig = %path.display(), "Using kubeconfig file");
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}

/// Workload store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeWorkloadStore {
    client: Client,
    timeout: Duration,
}

impl KubeWorkloadStore {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn bounded<T, F>(
        &self,
        operation: impl FnOnce() -> String,
        call: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation: operation(),
                after: self.timeout,
            }),
        }
    }

    async fn list_kind<K>(&self, kind: WorkloadKind) -> Result<Vec<Workload>, StoreError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
        Workload: From<K>,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = self
            .bounded(
                || format!("list {kind}s"),
                async {
                    api.list(&ListParams::default())
                        .await
                        .map_err(|e| StoreError::List {
                            kind,
                            source: Box::new(e),
                        })
                },
            )
            .await?;

        debug!(kind = %kind, count = list.items.len(), "Listed workloads");
        Ok(list.items.into_iter().map(Workload::from).collect())
    }

    async fn patch_kind<K>(&self, workload: &Workload) -> Result<(), StoreError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let kind = workload.kind();
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        let patch = template_patch(workload);

        self.bounded(
            || format!("update {kind} {}/{}", workload.namespace, workload.name),
            async {
                api.patch(&workload.name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
                    .map_err(|e| StoreError::Update {
                        kind,
                        namespace: workload.namespace.clone(),
                        name: workload.name.clone(),
                        source: Box::new(e),
                    })
            },
        )
        .await
    }
}

/// Merge patch writing the pod-template annotations, conditional on the
/// resource version the workload was listed at
fn template_patch(workload: &Workload) -> serde_json::Value {
    let mut patch = json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": workload.pod_template_annotations
                }
            }
        }
    });
    if let Some(version) = &workload.resource_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }
    patch
}

#[async_trait]
impl WorkloadStore for KubeWorkloadStore {
    async fn list(&self, kind: WorkloadKind) -> Result<Vec<Workload>, StoreError> {
        match kind {
            WorkloadKind::Deployment => self.list_kind::<Deployment>(kind).await,
            WorkloadKind::StatefulSet => self.list_kind::<StatefulSet>(kind).await,
            WorkloadKind::DaemonSet => self.list_kind::<DaemonSet>(kind).await,
        }
    }

    async fn update(&self, workload: &Workload) -> Result<(), StoreError> {
        match workload.kind() {
            WorkloadKind::Deployment => self.patch_kind::<Deployment>(workload).await,
            WorkloadKind::StatefulSet => self.patch_kind::<StatefulSet>(workload).await,
            WorkloadKind::DaemonSet => self.patch_kind::<DaemonSet>(workload).await,
        }
    }
}
