//! Lease-based leader election
//!
//! Only the instance holding the `coordination.k8s.io/v1` Lease runs the
//! scheduler. The holder renews the lease every retry period; the lease is
//! free for others to take once `renewTime + leaseDurationSeconds` has
//! passed. Writes carry the lease's resource version, so two instances
//! racing for the same lease cannot both win.

use crate::error::LeaderError;
use crate::observability::StructuredLogger;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::PostParams;
use kube::{Api, Client};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Timing and identity of the lease lock
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub name: String,
    pub namespace: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    pub api_timeout: Duration,
}

impl LeaseConfig {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            identity: identity.into(),
            lease_duration: Duration::from_secs(60),
            renew_deadline: Duration::from_secs(15),
            retry_period: Duration::from_secs(5),
            api_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one acquire-or-renew round
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Acquired,
    HeldBy(String),
    /// Someone else wrote the lease between our read and our write
    Conflict,
}

impl LeaderError {
    fn is_conflict(&self) -> bool {
        matches!(
            self,
            LeaderError::Api { source: kube::Error::Api(response), .. } if response.code == 409
        )
    }
}

/// Acquires and holds the lease
pub struct LeaderElector {
    api: Api<Lease>,
    config: LeaseConfig,
    logger: StructuredLogger,
}

impl LeaderElector {
    pub fn new(client: Client, config: LeaseConfig, logger: StructuredLogger) -> Self {
        let api = Api::namespaced(client, &config.namespace);
        Self {
            api,
            config,
            logger,
        }
    }

    pub fn lease(&self) -> String {
        format!("{}/{}", self.config.namespace, self.config.name)
    }

    /// Wait until this instance holds the lease
    pub async fn acquire(&self) {
        let mut observed_holder: Option<String> = None;
        loop {
            match self.try_acquire_or_renew().await {
                Ok(Attempt::Acquired) => {
                    self.logger.log_leader_acquired(&self.lease());
                    return;
                }
                Ok(Attempt::HeldBy(holder)) => {
                    if observed_holder.as_deref() != Some(holder.as_str()) {
                        self.logger.log_new_leader(&self.lease(), &holder);
                        observed_holder = Some(holder);
                    }
                }
                Ok(Attempt::Conflict) => debug!(lease = %self.lease(), "Lost race for lease"),
                Err(e) => warn!(lease = %self.lease(), error = %e, "Failed to acquire lease"),
            }
            tokio::time::sleep(self.config.retry_period).await;
        }
    }

    /// Keep renewing the lease. Returns once leadership is lost.
    pub async fn hold(&self) {
        let mut last_renewal = Instant::now();
        loop {
            tokio::time::sleep(self.config.retry_period).await;

            match self.try_acquire_or_renew().await {
                Ok(Attempt::Acquired) => {
                    last_renewal = Instant::now();
                    continue;
                }
                Ok(Attempt::HeldBy(holder)) => {
                    warn!(lease = %self.lease(), holder = %holder, "Lease taken over");
                    break;
                }
                Ok(Attempt::Conflict) => debug!(lease = %self.lease(), "Conflict renewing lease"),
                Err(e) => warn!(lease = %self.lease(), error = %e, "Failed to renew lease"),
            }

            if last_renewal.elapsed() > self.config.renew_deadline {
                break;
            }
        }
        self.logger.log_leader_lost(&self.lease());
    }

    /// Give the lease up so another instance can take over right away
    pub async fn release(&self) -> Result<(), LeaderError> {
        let Some(mut lease) = self.call(self.api.get_opt(&self.config.name)).await? else {
            return Ok(());
        };
        let spec = lease.spec.clone().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(self.config.identity.as_str()) {
            return Ok(());
        }

        lease.spec = Some(LeaseSpec {
            holder_identity: None,
            lease_duration_seconds: Some(1),
            renew_time: Some(MicroTime(Utc::now())),
            ..spec
        });
        self.call(self.api.replace(&self.config.name, &PostParams::default(), &lease))
            .await?;
        debug!(lease = %self.lease(), "Released lease");
        Ok(())
    }

    async fn try_acquire_or_renew(&self) -> Result<Attempt, LeaderError> {
        let now = Utc::now();
        let identity = self.config.identity.as_str();

        let result = match self.call(self.api.get_opt(&self.config.name)).await? {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(self.config.name.clone()),
                        namespace: Some(self.config.namespace.clone()),
                        ..ObjectMeta::default()
                    },
                    spec: Some(next_spec(None, identity, self.config.lease_duration, now)),
                };
                self.call(self.api.create(&PostParams::default(), &lease)).await
            }
            Some(mut lease) => {
                let current = lease.spec.as_ref();
                if !can_acquire(current, identity, now) {
                    let holder = current
                        .and_then(|s| s.holder_identity.clone())
                        .unwrap_or_default();
                    return Ok(Attempt::HeldBy(holder));
                }
                lease.spec = Some(next_spec(current, identity, self.config.lease_duration, now));
                self.call(self.api.replace(&self.config.name, &PostParams::default(), &lease))
                    .await
            }
        };

        match result {
            Ok(_) => Ok(Attempt::Acquired),
            Err(e) if e.is_conflict() => Ok(Attempt::Conflict),
            Err(e) => Err(e),
        }
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = kube::Result<T>>,
    ) -> Result<T, LeaderError> {
        match tokio::time::timeout(self.config.api_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(LeaderError::Api {
                namespace: self.config.namespace.clone(),
                name: self.config.name.clone(),
                source,
            }),
            Err(_) => Err(LeaderError::Timeout {
                namespace: self.config.namespace.clone(),
                name: self.config.name.clone(),
                after: self.config.api_timeout,
            }),
        }
    }
}

/// Whether `identity` may take or keep the lease at `now`
fn can_acquire(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    let holder = spec.holder_identity.as_deref().unwrap_or_default();
    if holder.is_empty() || holder == identity {
        return true;
    }

    let duration = chrono::Duration::seconds(i64::from(spec.lease_duration_seconds.unwrap_or(0)));
    match spec.renew_time.as_ref().or(spec.acquire_time.as_ref()) {
        Some(renewed) => renewed.0 + duration < now,
        None => true,
    }
}

/// Spec recording `identity` as holder, renewed at `now`
fn next_spec(
    current: Option<&LeaseSpec>,
    identity: &str,
    lease_duration: Duration,
    now: DateTime<Utc>,
) -> LeaseSpec {
    let current = current.cloned().unwrap_or_default();
    let renewing = current.holder_identity.as_deref() == Some(identity);
    let transitions = current.lease_transitions.unwrap_or(0);

    LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(lease_duration.as_secs().min(i32::MAX as u64) as i32),
        acquire_time: if renewing {
            current.acquire_time.clone().or(Some(MicroTime(now)))
        } else {
            Some(MicroTime(now))
        },
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(if renewing || current.holder_identity.is_none() {
            transitions
        } else {
            transitions + 1
        }),
        ..current
    }
}
