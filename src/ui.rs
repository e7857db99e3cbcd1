use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use toml::{Table, Value};

use crate::sim::config::{PerformanceMode, RackConfig, SchedulingPolicy};
use crate::sim::top::Sim;
use crate::workload::catalog;
use crate::workload::job::{CustomJob, JobSpec};

#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct RackArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: Option<PathBuf>,
    #[arg(long, default_value_t = 1000, help = "Number of ticks to simulate")]
    pub ticks: u64,
    #[arg(long, help = "Override total GPU count (flat topology, one GPU per superchip)")]
    pub gpus: Option<usize>,
    #[arg(long, help = "Override scheduling policy (fifo, sjf_estimated)")]
    pub policy: Option<SchedulingPolicy>,
    #[arg(long, help = "Override performance mode (theoretical, realistic)")]
    pub mode: Option<PerformanceMode>,
    #[arg(long, help = "Seed for failure injection")]
    pub seed: Option<u64>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    pub log: Option<u64>,
    #[arg(long, help = "Start without the example jobs")]
    pub empty: bool,
    #[arg(
        long = "submit",
        value_name = "KEY[:TOKENS]",
        value_parser = parse_submission,
        help = "Queue a catalog job, repeatable"
    )]
    pub submissions: Vec<JobSpec>,
    #[arg(long = "fail-at", value_name = "TICK", help = "Trigger a manual GPU failure at this tick, repeatable")]
    pub fail_at: Vec<u64>,
    #[arg(long, help = "Write the run summary here instead of the run directory")]
    pub summary: Option<PathBuf>,
    #[arg(long, help = "Print the workload catalog and exit")]
    pub list_workloads: bool,
}

/// One line per catalog entry: key, category and description.
pub fn workload_listing() -> Vec<String> {
    catalog::keys()
        .into_iter()
        .filter_map(|key| catalog::lookup(key).map(|workload| (key, workload)))
        .map(|(key, workload)| {
            format!(
                "{:<22} {:<10} {}",
                key,
                workload.category().to_string(),
                workload.name
            )
        })
        .collect()
}

/// Parses `key` or `key:tokens` into a catalog submission.
pub fn parse_submission(value: &str) -> Result<JobSpec, String> {
    let (key, tokens) = match value.split_once(':') {
        Some((key, tokens)) => {
            let tokens = tokens
                .trim()
                .parse::<u64>()
                .map_err(|err| format!("invalid token count '{}': {}", tokens, err))?;
            (key, Some(tokens))
        }
        None => (value, None),
    };
    let key = key.trim();
    if key.is_empty() {
        return Err("workload key must not be empty".to_string());
    }
    Ok(JobSpec::catalog(key, tokens))
}

/// Reads the optional `[[jobs]]` array. Entries with a `workload` key are
/// catalog submissions, anything else is a custom job description.
pub fn jobs_from_table(table: &Table) -> anyhow::Result<Vec<JobSpec>> {
    let Some(jobs) = table.get("jobs") else {
        return Ok(Vec::new());
    };
    let Some(entries) = jobs.as_array() else {
        bail!("'jobs' must be an array of tables");
    };

    let mut specs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let spec = match entry.get("workload").and_then(Value::as_str) {
            Some(key) => {
                let total_tokens = match entry.get("total_tokens") {
                    Some(value) => Some(
                        value
                            .as_integer()
                            .and_then(|tokens| u64::try_from(tokens).ok())
                            .with_context(|| format!("jobs[{index}].total_tokens must be a non-negative integer"))?,
                    ),
                    None => None,
                };
                JobSpec::catalog(key, total_tokens)
            }
            None => {
                let custom: CustomJob = entry
                    .clone()
                    .try_into()
                    .with_context(|| format!("cannot deserialize jobs[{index}]"))?;
                JobSpec::Custom(custom)
            }
        };
        specs.push(spec);
    }
    Ok(specs)
}

/// Make a Sim object from the TOML configuration.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_sim(toml_string: &str, cli_args: Option<&RackArgs>) -> anyhow::Result<(Sim, RackConfig)> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let mut config = RackConfig::from_table(&config_table)?;

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        config.sim.log_level = args.log.unwrap_or(config.sim.log_level);
        config.sim.scheduling_policy = args.policy.unwrap_or(config.sim.scheduling_policy);
        config.sim.performance_mode = args.mode.unwrap_or(config.sim.performance_mode);
        config.sim.seed = args.seed.or(config.sim.seed);
        if let Some(gpus) = args.gpus {
            config.rack.superchips_per_rack = gpus;
            config.rack.gpus_per_superchip = 1;
        }
    }
    config.validate()?;

    let mut sim = Sim::new(&config);
    if cli_args.is_some_and(|args| args.empty) {
        sim.reset(&config);
    }

    let cli_jobs = cli_args.map(|args| args.submissions.as_slice()).unwrap_or_default();
    for spec in jobs_from_table(&config_table)?.iter().chain(cli_jobs) {
        let id = sim
            .submit_job(spec)
            .with_context(|| format!("cannot submit {:?}", spec))?;
        info!("submitted {}", id);
    }

    Ok((sim, config))
}
