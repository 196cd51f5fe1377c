//! Periodic rolling restarts for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Selecting Deployments, StatefulSets and DaemonSets with include/exclude matchers
//! - Deciding when a workload is due for a restart
//! - Triggering restarts through a pod-template annotation
//! - Running reconciliation cycles on a fixed interval
//! - Lease-based leader election, health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod leader;
pub mod observability;
pub mod reconciler;
pub mod scheduler;
pub mod selection;
pub mod store;
pub mod workload;

pub use config::RestarterConfig;
pub use error::{ConfigError, CycleError, LeaderError, StoreError, WorkloadError};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry};
pub use leader::{LeaderElector, LeaseConfig};
pub use observability::{RestarterMetrics, StructuredLogger};
pub use reconciler::{CycleInfo, Reconciler};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerState};
pub use selection::{Matcher, Selector};
pub use store::{KubeWorkloadStore, WorkloadStore};
pub use workload::{Workload, WorkloadKind, RESTARTED_AT_ANNOTATION};
