//! Offline status report: reads the persisted controller snapshot and the
//! stored probe window, no live daemon required.

use crate::config::ControllerConfig;
use chrono::Utc;
use nsguard_core::StorageSink;
use nsguard_machine::ControllerSnapshot;
use nsguard_monitor::score_results;
use nsguard_persist::{FileResultStore, SnapshotStore};
use nsguard_proto::ControllerState;

pub async fn print_status(config: &ControllerConfig, last_n: usize) -> anyhow::Result<()> {
    let snapshots = SnapshotStore::new(&config.state_path, "controller");
    let snapshot: Option<ControllerSnapshot> = snapshots.load();

    println!("Zone:        {}", config.zone);
    match &snapshot {
        Some(s) => {
            println!("State:       {} (since {})", s.state, s.entered_at);
            println!(
                "Active:      {} (propagation verified: {})",
                s.binding.active_provider,
                if s.binding.propagation_verified {
                    "yes"
                } else {
                    "no"
                }
            );
            println!("Authorized:  {}", if s.authorized { "yes" } else { "no" });
        }
        None => {
            println!(
                "State:       {} (no controller state recorded yet)",
                ControllerState::Healthy
            );
        }
    }

    println!();
    println!(
        "Provider scores (last {} minutes):",
        config.status_window_mins
    );
    let store = FileResultStore::new(&config.state_path);
    let since = Utc::now() - chrono::Duration::minutes(config.status_window_mins);
    let (primary, secondary) = config.providers()?;
    for provider in [&primary, &secondary] {
        let results = store.get_results_since(since, Some(&provider.id)).await?;
        if results.is_empty() {
            println!("  {:<14} no recent probes", provider.id);
        } else {
            let score = score_results(&provider.id, &results);
            println!(
                "  {:<14} {:6.1}  ({} probes, success rate {:.0}%)",
                provider.id,
                score.composite,
                score.samples,
                score.success_rate * 100.0
            );
        }
    }

    if let Some(s) = &snapshot {
        println!();
        let start = s.transitions.len().saturating_sub(last_n);
        let recent = &s.transitions[start..];
        if recent.is_empty() {
            println!("No transitions recorded.");
        } else {
            println!("Last {} transitions:", recent.len());
            for record in recent {
                println!(
                    "  {}  {} -> {}  {}",
                    record.at, record.from, record.to, record.reason
                );
            }
        }
    }

    Ok(())
}
