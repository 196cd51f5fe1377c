//! k8s-restarter - periodic rolling restarts for Kubernetes workloads
//!
//! Runs as a single Deployment in the cluster. Every reconciliation interval
//! it restarts the selected Deployments, StatefulSets and DaemonSets whose
//! last restart is older than the restart interval.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use restarter_lib::{
    health::{components, HealthRegistry},
    leader::{LeaderElector, LeaseConfig},
    observability::{RestarterMetrics, StructuredLogger},
    reconciler::Reconciler,
    scheduler::Scheduler,
    store::{build_client, KubeWorkloadStore},
    RestarterConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

mod api;
mod config;

const RESTARTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "k8s-restarter")]
#[command(
    about = "Periodically restarts Deployments, StatefulSets and DaemonSets",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Path to a kubeconfig file. When unset the client is inferred from
    /// `KUBECONFIG`, the default kubeconfig or the in-cluster service account.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Path to the restarter configuration file
    #[arg(long, env = "RESTARTER_CONFIG")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, env = "RESTARTER_DEBUG")]
    debug: bool,

    /// Name of the lease used for leader election; election is off when unset
    #[arg(long, env = "RESTARTER_LEASE_LOCK_NAME")]
    lease_lock_name: Option<String>,

    /// Namespace of the leader election lease
    #[arg(long, env = "RESTARTER_LEASE_LOCK_NAMESPACE", default_value = "default")]
    lease_lock_namespace: String,

    /// Holder identity for leader election
    #[arg(long, env = "RESTARTER_ID")]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    let identity = cli.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let logger = StructuredLogger::new(&identity);
    logger.log_startup(RESTARTER_VERSION, &cli.config.display().to_string());

    let config = RestarterConfig::load(&cli.config)
        .with_context(|| format!("failed to load config file {}", cli.config.display()))?;
    info!(
        restart_interval = %humanize(config.restart_interval),
        reconciliation_interval = %humanize(config.reconciliation_interval),
        include_enabled = config.include.enabled,
        exclude_enabled = config.exclude.enabled,
        "Restarter configured"
    );
    let settings = config::Settings::load().context("failed to read environment settings")?;

    let client = build_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow!(e))
        .context("failed to create kubernetes client")?;
    let store = Arc::new(KubeWorkloadStore::new(client.clone(), config.api_timeout));

    let metrics = RestarterMetrics::new().context("failed to register metrics")?;
    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONTROLLER).await;

    // Bind before anything else starts so a taken port is fatal
    let listener = api::bind(settings.api_port)
        .await
        .with_context(|| format!("failed to bind API server on port {}", settings.api_port))?;
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let mut api_handle = tokio::spawn(api::serve(listener, app_state));

    let elector = cli.lease_lock_name.as_ref().map(|name| {
        let mut lease = LeaseConfig::new(name, &cli.lease_lock_namespace, &identity);
        lease.api_timeout = config.api_timeout;
        LeaderElector::new(client.clone(), lease, logger.clone())
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    if let Some(elector) = &elector {
        info!(lease = %elector.lease(), "Waiting for leadership");
        tokio::select! {
            reason = &mut shutdown => {
                logger.log_shutdown(reason);
                api_handle.abort();
                return Ok(());
            }
            result = &mut api_handle => return Err(server_exit(result)),
            _ = elector.acquire() => {}
        }
    }

    let reconciler = Reconciler::new(store, Arc::new(config), metrics, logger.clone());
    let scheduler = Scheduler::new(reconciler, health_registry.clone()).start();
    health_registry.set_ready(true).await;

    let outcome = tokio::select! {
        reason = &mut shutdown => Ok(reason),
        _ = leadership_lost(elector.as_ref()) => Ok("leadership lost"),
        result = &mut api_handle => Err(server_exit(result)),
    };

    match &outcome {
        Ok(reason) => logger.log_shutdown(reason),
        Err(e) => {
            error!(error = %format!("{e:#}"), "API server stopped");
            logger.log_shutdown("API server stopped");
        }
    }
    health_registry.set_ready(false).await;
    scheduler.stop().await;

    if let Some(elector) = &elector {
        if let Err(e) = elector.release().await {
            warn!(lease = %elector.lease(), error = %e, "Failed to release lease");
        }
    }

    api_handle.abort();
    info!("Shutdown complete");
    outcome.map(|_| ())
}

/// Resolves when leadership is lost; never without leader election
async fn leadership_lost(elector: Option<&LeaderElector>) {
    match elector {
        Some(elector) => elector.hold().await,
        None => std::future::pending().await,
    }
}

/// Error for an API server task that returned while the process was running
fn server_exit(result: Result<Result<()>, JoinError>) -> anyhow::Error {
    match result {
        Ok(Ok(())) => anyhow!("API server stopped unexpectedly"),
        Ok(Err(e)) => e.context("API server failed"),
        Err(e) => anyhow::Error::new(e).context("API server task failed"),
    }
}

fn humanize(duration: std::time::Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Resolves with a description of the first termination signal received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["k8s-restarter", "--config", "/etc/restarter/config.yaml"])
            .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/restarter/config.yaml"));
        assert_eq!(cli.lease_lock_namespace, "default");
        assert!(cli.lease_lock_name.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_leader_election_flags() {
        let cli = Cli::try_parse_from([
            "k8s-restarter",
            "--config",
            "config.yaml",
            "--lease-lock-name",
            "k8s-restarter",
            "--lease-lock-namespace",
            "ops",
            "--id",
            "pod-a",
            "--debug",
        ])
        .unwrap();

        assert_eq!(cli.lease_lock_name.as_deref(), Some("k8s-restarter"));
        assert_eq!(cli.lease_lock_namespace, "ops");
        assert_eq!(cli.id.as_deref(), Some("pod-a"));
        assert!(cli.debug);
    }

    #[test]
    fn test_kubeconfig_not_read_from_env() {
        // KUBECONFIG may hold a path list; client inference handles it
        let command = Cli::command();
        let kubeconfig = command
            .get_arguments()
            .find(|arg| arg.get_id() == "kubeconfig")
            .unwrap();

        assert!(kubeconfig.get_env().is_none());
    }

    #[test]
    fn test_server_exit_is_an_error() {
        let failed = server_exit(Ok(Err(anyhow!("address in use"))));
        assert!(format!("{failed:#}").contains("address in use"));

        let stopped = server_exit(Ok(Ok(())));
        assert!(stopped.to_string().contains("stopped unexpectedly"));
    }
}
