//! Periodic reconciliation loop
//!
//! The loop runs one cycle immediately, then one cycle every
//! reconciliation interval. Waiting between cycles is raced against the
//! shutdown channel; a cycle in progress is never interrupted, so stopping
//! waits for it to complete.

use crate::health::{components, HealthRegistry};
use crate::reconciler::{CycleInfo, Reconciler};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Lifecycle state of the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
}

/// Drives reconciliation cycles and reports their health
pub struct Scheduler {
    reconciler: Reconciler,
    health: HealthRegistry,
    interval: Duration,
}

impl Scheduler {
    /// Create a scheduler using the configured reconciliation interval
    pub fn new(reconciler: Reconciler, health: HealthRegistry) -> Self {
        let interval = reconciler.config().reconciliation_interval;
        Self {
            reconciler,
            health,
            interval,
        }
    }

    /// Spawn the loop on the current runtime
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Running);
        let task = tokio::spawn(self.run(shutdown_rx, state_tx));

        SchedulerHandle {
            shutdown_tx,
            state_rx,
            task,
        }
    }

    /// Run cycles until a shutdown message arrives or the sender is dropped
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
        state: watch::Sender<SchedulerState>,
    ) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconciliation loop"
        );
        state.send_replace(SchedulerState::Running);

        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }

            self.run_cycle().await;

            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        state.send_replace(SchedulerState::Stopped);
        info!("Stopped reconciliation loop");
    }

    /// Run a single cycle and publish its health
    pub async fn run_cycle(&self) -> Option<CycleInfo> {
        match self.reconciler.reconcile().await {
            Ok(info) => {
                self.health.set_healthy(components::CONTROLLER).await;
                Some(info)
            }
            Err(err) => {
                self.health
                    .set_unhealthy(components::CONTROLLER, err.to_string())
                    .await;
                None
            }
        }
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    state_rx: watch::Receiver<SchedulerState>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes state transitions
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Request a stop and wait until the loop has exited
    pub async fn stop(self) -> SchedulerState {
        // A send error only means the loop is already gone
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reconciliation loop ended abnormally");
        }
        let state = *self.state_rx.borrow();
        state
    }
}
