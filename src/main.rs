use std::collections::BTreeSet;
use std::fs;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use gpurack::sim::config::RackConfig;
use gpurack::sim::log as sim_log;
use gpurack::sim::perf_log::{self, RunDir, RunSummary};
use gpurack::ui::{make_sim, workload_listing, RackArgs};

const PROGRESS_INTERVAL: u64 = 100;

pub fn main() -> anyhow::Result<()> {
    let argv = RackArgs::parse();
    if argv.list_workloads {
        for line in workload_listing() {
            println!("{line}");
        }
        return Ok(());
    }

    let config = match &argv.config_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?,
        None => String::new(),
    };

    let log_level = match argv.log {
        Some(level) => level,
        None => RackConfig::from_toml_str(&config)?.sim.log_level,
    };
    sim_log::init(log_level);

    let (mut sim, rack_config) = make_sim(&config, Some(&argv))?;

    let fail_at: BTreeSet<u64> = argv.fail_at.iter().copied().collect();
    let stats_requested = perf_log::stats_log_requested();
    let run_dir = if argv.summary.is_none() || stats_requested {
        Some(RunDir::create()?)
    } else {
        None
    };
    let mut stats_log = match &run_dir {
        Some(dir) if stats_requested => Some(dir.stats_log()?),
        _ => None,
    };

    for _ in 0..argv.ticks {
        sim.tick(&rack_config);
        let tick = sim.ticks();

        if fail_at.contains(&tick) {
            match sim.trigger_manual_failure(&rack_config) {
                Ok(gpu) => warn!("tick {}: manually failed {}", tick, gpu),
                Err(err) => warn!("tick {}: manual failure skipped: {}", tick, err),
            }
        }

        if let Some(stats_log) = stats_log.as_mut() {
            stats_log.record(tick, &sim.stats(&rack_config))?;
        }

        if tick % PROGRESS_INTERVAL == 0 {
            let stats = sim.stats(&rack_config);
            info!(
                "t={:.1}s busy={} error={} throttled={} pending={} done={} failed={} {:.0} tok/s",
                stats.simulation_time,
                stats.active_gpus,
                stats.error_gpus,
                stats.throttled_gpus,
                stats.pending_jobs,
                stats.completed_jobs,
                stats.failed_jobs,
                stats.tokens_per_second
            );
        }
    }
    if let Some(stats_log) = stats_log {
        stats_log.finish()?;
    }

    let summary = RunSummary::collect(&sim, &rack_config);
    let path = match (&argv.summary, &run_dir) {
        (Some(path), _) => path.clone(),
        (None, Some(dir)) => dir.summary_path(),
        (None, None) => RunDir::create()?.summary_path(),
    };
    perf_log::write_summary(&summary, &path)?;
    println!(
        "{} ticks, {:.1}s simulated: {} completed, {} failed, {} pending; summary at {}",
        sim.ticks(),
        summary.stats.simulation_time,
        summary.stats.completed_jobs - summary.stats.failed_jobs,
        summary.stats.failed_jobs,
        summary.stats.pending_jobs,
        path.display()
    );
    Ok(())
}
