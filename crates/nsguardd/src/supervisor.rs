//! Daemon control loop.
//!
//! One task runs the probe monitor; this loop consumes its sweep events,
//! translates composite scores onto the machine's scale, and drives
//! `evaluate`. The machine sits behind a mutex so every evaluation (and
//! the registrar I/O inside a failover side effect) runs in a single
//! critical section.

use nsguard_machine::{FailoverMachine, ScoreScale};
use nsguard_metrics::ProbeMetrics;
use nsguard_monitor::{Monitor, SweepEvent};
use nsguard_persist::SnapshotStore;
use nsguard_proto::ProviderId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 32;

pub struct Supervisor {
    machine: Arc<Mutex<FailoverMachine>>,
    monitor: Arc<Monitor>,
    metrics: Arc<ProbeMetrics>,
    snapshots: SnapshotStore,
    scale: ScoreScale,
    interval: Duration,
    metrics_path: PathBuf,
}

impl Supervisor {
    pub fn new(
        machine: FailoverMachine,
        monitor: Monitor,
        metrics: Arc<ProbeMetrics>,
        snapshots: SnapshotStore,
        scale: ScoreScale,
        interval: Duration,
        state_dir: &std::path::Path,
    ) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            monitor: Arc::new(monitor),
            metrics,
            snapshots,
            scale,
            interval,
            metrics_path: state_dir.join("state").join("metrics.prom"),
        }
    }

    /// Run until SIGINT. The monitor loop is told to stop first so it can
    /// drain any in-flight sweep; the final controller snapshot is written
    /// on the way out.
    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let monitor = self.monitor.clone();
        let interval = self.interval;
        let probe_loop = tokio::spawn(async move {
            monitor.run_forever(interval, shutdown_rx, event_tx).await;
        });

        info!(interval_secs = self.interval.as_secs(), "controller running");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    let _ = shutdown_tx.send(true);
                    break;
                }
                event = event_rx.recv() => match event {
                    None => {
                        warn!("monitor loop ended unexpectedly");
                        break;
                    }
                    Some(SweepEvent::Failed { error }) => {
                        error!(%error, "sweep aborted; scores not evaluated this tick");
                    }
                    Some(SweepEvent::Completed { scores, probes }) => {
                        self.handle_sweep(scores.iter().map(|(id, s)| (id.clone(), s.composite)).collect(), probes).await;
                    }
                },
            }
        }

        let _ = probe_loop.await;
        self.persist().await;
        info!("controller stopped");
        Ok(())
    }

    async fn handle_sweep(&self, composites: HashMap<ProviderId, f64>, probes: usize) {
        let scores: HashMap<ProviderId, f64> = composites
            .into_iter()
            .map(|(id, composite)| (id, self.scale.from_percent(composite)))
            .collect();

        let mut machine = self.machine.lock().await;
        match machine.evaluate(&scores).await {
            Ok(Some(state)) => {
                info!(state = %state, probes, "transition committed");
                if let Err(e) = self.snapshots.save(&machine.snapshot()) {
                    error!(error = %e, "failed to persist controller snapshot");
                }
            }
            Ok(None) => {}
            Err(e) => {
                // Validation or registrar failure. State is unchanged; the
                // next sweep retries, still gated by cooldown and ceiling.
                error!(error = %e, "evaluation failed");
            }
        }
        drop(machine);

        self.export_metrics();
    }

    async fn persist(&self) {
        let machine = self.machine.lock().await;
        if let Err(e) = self.snapshots.save(&machine.snapshot()) {
            error!(error = %e, "failed to persist final controller snapshot");
        }
    }

    /// Write the Prometheus text rendering next to the rest of the state,
    /// where a textfile collector can pick it up.
    fn export_metrics(&self) {
        if let Some(parent) = self.metrics_path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(error = %e, "cannot create metrics directory");
            return;
        }
        if let Err(e) = std::fs::write(&self.metrics_path, self.metrics.render()) {
            warn!(error = %e, path = %self.metrics_path.display(), "failed to export metrics");
        }
    }
}
