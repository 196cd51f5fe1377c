//! Error types for the restarter
//!
//! Errors are grouped by how far they reach: a [`ConfigError`] is fatal at
//! startup, a [`CycleError`] abandons one reconciliation cycle and a
//! [`WorkloadError`] only affects a single workload within a cycle.

use crate::workload::WorkloadKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed cause carried by store errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to load the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config file {path} does not set restartInterval")]
    MissingRestartInterval { path: PathBuf },

    #[error("config file {path} mixes legacy fields ({legacy}) with include/exclude matchers")]
    MixedSchema { path: PathBuf, legacy: String },
}

/// Failure of a call to the workload store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to list {kind}s")]
    List {
        kind: WorkloadKind,
        #[source]
        source: BoxError,
    },

    #[error("failed to update {kind} {namespace}/{name}")]
    Update {
        kind: WorkloadKind,
        namespace: String,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} did not complete within {after:?}")]
    Timeout { operation: String, after: Duration },
}

/// Failure while processing a single workload. Never aborts the cycle.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to parse restart marker {value:?} on {kind} {namespace}/{name}")]
    AnnotationParse {
        kind: WorkloadKind,
        namespace: String,
        name: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("failed to set restart marker on {kind} {namespace}/{name}")]
    UpdateFailed {
        kind: WorkloadKind,
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },
}

impl WorkloadError {
    /// Short label used in logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            WorkloadError::AnnotationParse { .. } => "annotation_parse",
            WorkloadError::UpdateFailed { .. } => "update_failed",
        }
    }
}

/// Failure that abandons a whole reconciliation cycle
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to get {kind}s")]
    ListFailed {
        kind: WorkloadKind,
        #[source]
        source: StoreError,
    },
}

/// Failure talking to the lease API during leader election
#[derive(Debug, Error)]
pub enum LeaderError {
    #[error("lease request for {namespace}/{name} failed")]
    Api {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("lease request for {namespace}/{name} did not complete within {after:?}")]
    Timeout {
        namespace: String,
        name: String,
        after: Duration,
    },
}
