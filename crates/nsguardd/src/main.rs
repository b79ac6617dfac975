//! nsguardd — authoritative-DNS failover controller.
//!
//! Probes every configured provider's nameservers, scores provider health,
//! and drives a guarded state machine that switches the zone's registrar
//! delegation when the primary fails badly enough, then restores it once
//! the primary recovers.

use clap::{Parser, Subcommand};
use nsguard_core::{Clock, RegistrarError, SystemClock};
use nsguard_dns::UdpDnsQuery;
use nsguard_machine::{
    ControllerSnapshot, FailoverError, FailoverLedger, FailoverMachine, SafetyRejection,
};
use nsguard_metrics::ProbeMetrics;
use nsguard_monitor::Monitor;
use nsguard_persist::{FileResultStore, SnapshotStore};
use nsguard_proto::{ControllerState, DnsBinding, Provider};
use nsguard_registrar::{HttpRegistrar, PropagationPoll, RegistrarDriver};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod status;
mod supervisor;

use config::ControllerConfig;
use supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "nsguardd")]
#[command(about = "Authoritative-DNS failover controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller (probe, evaluate, fail over when justified)
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/nsguard/config.json")]
        config: PathBuf,
    },

    /// Show current state, provider scores, and recent transitions
    Status {
        #[arg(short, long, default_value = "/etc/nsguard/config.json")]
        config: PathBuf,

        /// How many transitions to show
        #[arg(short = 'n', long, default_value_t = 10)]
        last: usize,
    },

    /// Set the single-use failover authorization flag
    Authorize {
        #[arg(short, long, default_value = "/etc/nsguard/config.json")]
        config: PathBuf,
    },

    /// Fail over to the secondary provider now (requires authorization)
    ForceFailover {
        #[arg(short, long, default_value = "/etc/nsguard/config.json")]
        config: PathBuf,

        /// Operator id recorded in the transition log
        #[arg(long)]
        operator: String,
    },

    /// Write a sample config file
    InitConfig {
        #[arg(short, long, default_value = "/etc/nsguard/config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Status output stays clean of log lines.
    if !matches!(cli.command, Commands::Status { .. }) {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let outcome = match cli.command {
        Commands::Run { config } => run_controller(config).await,
        Commands::Status { config, last } => show_status(config, last).await,
        Commands::Authorize { config } => authorize(config),
        Commands::ForceFailover { config, operator } => force_failover(config, operator).await,
        Commands::InitConfig { output } => init_config(output),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// 0 success, 1 generic error, 2 safety rejection, 3 registrar error.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(failover) = err.downcast_ref::<FailoverError>() {
        return match failover {
            FailoverError::Safety(_) => 2,
            FailoverError::Registrar(_) => 3,
            FailoverError::Validation(_) => 1,
        };
    }
    if err.downcast_ref::<SafetyRejection>().is_some() {
        return 2;
    }
    if err.downcast_ref::<RegistrarError>().is_some() {
        return 3;
    }
    1
}

// ─── Run ─────────────────────────────────────────────────────────────────────

async fn run_controller(config_path: PathBuf) -> anyhow::Result<()> {
    let config = ControllerConfig::load(&config_path)?;
    let (primary, secondary) = config.providers()?;
    info!(
        zone = %config.zone,
        primary = %primary.id,
        secondary = %secondary.id,
        profile = %config.profile,
        "starting nsguard controller"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let snapshots = SnapshotStore::new(&config.state_path, "controller");
    let (machine, failover_config) = build_machine(&config, &primary, &secondary, clock.clone(), &snapshots).await?;

    let query = Arc::new(UdpDnsQuery::new(Duration::from_millis(config.probe_timeout_ms)));
    let storage = Arc::new(FileResultStore::new(&config.state_path));
    let metrics = Arc::new(ProbeMetrics::new());
    let monitor = Monitor::new(
        vec![primary, secondary],
        &config.zone,
        config.origin(),
        query,
        storage,
        metrics.clone(),
        clock,
    );

    Supervisor::new(
        machine,
        monitor,
        metrics,
        snapshots,
        failover_config.scale,
        Duration::from_secs(config.probe_interval_secs),
        &config.state_path,
    )
    .run()
    .await
}

async fn build_machine(
    config: &ControllerConfig,
    primary: &Provider,
    secondary: &Provider,
    clock: Arc<dyn Clock>,
    snapshots: &SnapshotStore,
) -> anyhow::Result<(FailoverMachine, nsguard_machine::FailoverConfig)> {
    let token = config.registrar_token()?;
    let registrar = Arc::new(HttpRegistrar::new(config.registrar_api.clone(), token));
    let mut driver = RegistrarDriver::new(
        registrar,
        clock.clone(),
        &config.zone,
        primary,
        config.ns_patterns(),
    );
    if config.propagation_poll {
        driver = driver.with_propagation_poll(PropagationPoll::default());
    }

    let failover_config = config.failover_config()?;
    let machine = match snapshots.load::<ControllerSnapshot>() {
        Some(snapshot) => {
            info!(state = %snapshot.state, "restoring controller state from snapshot");
            FailoverMachine::restore(
                failover_config.clone(),
                primary.clone(),
                secondary.clone(),
                driver,
                clock,
                snapshot,
            )?
        }
        None => FailoverMachine::new(
            failover_config.clone(),
            primary.clone(),
            secondary.clone(),
            driver,
            clock,
        )?,
    };

    // Catch delegation drift that happened while we were not running.
    if let Err(e) = machine.driver().refresh_binding().await {
        warn!(error = %e, "could not read registrar delegation at startup");
    }

    Ok((machine, failover_config))
}

// ─── Status ──────────────────────────────────────────────────────────────────

async fn show_status(config_path: PathBuf, last: usize) -> anyhow::Result<()> {
    let config = ControllerConfig::load(&config_path)?;
    status::print_status(&config, last).await
}

// ─── Authorize ───────────────────────────────────────────────────────────────

fn authorize(config_path: PathBuf) -> anyhow::Result<()> {
    let config = ControllerConfig::load(&config_path)?;
    let snapshots = SnapshotStore::new(&config.state_path, "controller");

    let mut snapshot = match snapshots.load::<ControllerSnapshot>() {
        Some(snapshot) => snapshot,
        None => initial_snapshot(&config)?,
    };
    snapshot.authorized = true;
    snapshots.save(&snapshot)?;

    info!(zone = %config.zone, "single-use failover authorization set");
    println!(
        "Single-use failover authorization set for {}. It is consumed by the next failover.",
        config.zone
    );
    Ok(())
}

fn initial_snapshot(config: &ControllerConfig) -> anyhow::Result<ControllerSnapshot> {
    let (primary, _) = config.providers()?;
    Ok(ControllerSnapshot {
        state: ControllerState::Healthy,
        entered_at: chrono::Utc::now(),
        authorized: false,
        transitions: Vec::new(),
        ledger: FailoverLedger::new(),
        binding: DnsBinding {
            zone: config.zone.clone(),
            active_provider: primary.id.clone(),
            nameservers: primary.endpoints.clone(),
            propagation_verified: true,
        },
    })
}

// ─── ForceFailover ───────────────────────────────────────────────────────────

async fn force_failover(config_path: PathBuf, operator: String) -> anyhow::Result<()> {
    let config = ControllerConfig::load(&config_path)?;
    let (primary, secondary) = config.providers()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let snapshots = SnapshotStore::new(&config.state_path, "controller");

    let (mut machine, _) =
        build_machine(&config, &primary, &secondary, clock, &snapshots).await?;

    machine.force_failover(&operator).await?;
    snapshots.save(&machine.snapshot())?;

    let binding = machine.binding();
    println!(
        "Failover committed: {} now delegated to {} ({})",
        config.zone,
        binding.active_provider,
        binding.nameservers.join(", ")
    );
    Ok(())
}

// ─── InitConfig ──────────────────────────────────────────────────────────────

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    ControllerConfig::sample().save(&output)?;
    println!("Config written to {}", output.display());
    println!();
    println!("Edit the zone, providers, and registrar settings, then run:");
    println!("  nsguardd run --config {}", output.display());
    Ok(())
}
