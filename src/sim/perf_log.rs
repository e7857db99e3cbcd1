use std::env;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use rand::Rng;
use serde::Serialize;

use crate::rack::accelerator::AcceleratorSnapshot;
use crate::rack::stats::RackStats;
use crate::sim::config::{PerformanceMode, RackConfig, SchedulingPolicy};
use crate::sim::top::Sim;
use crate::workload::job::{JobCategory, JobSnapshot, JobStatus};

/// Completed jobs included in a run summary.
pub const SUMMARY_JOB_WINDOW: usize = 50;
/// Root for run directories; defaults to `performance_logs`.
pub const PERF_LOG_DIR_VAR: &str = "GPURACK_PERF_LOG_DIR";
/// Set to 1/true/yes/on to write `stats.jsonl` next to the summary.
pub const STATS_LOG_VAR: &str = "GPURACK_STATS_LOG";

/// Totals over a window of finished jobs.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct JobTotals {
    pub completed: usize,
    pub failed: usize,
    pub inference: usize,
    pub training: usize,
    pub tokens_processed: f64,
    pub mean_duration_seconds: Option<f64>,
}

pub fn summarize_jobs(jobs: &[JobSnapshot]) -> JobTotals {
    let mut totals = JobTotals::default();
    let mut duration_sum = 0.0;
    let mut timed = 0usize;
    for job in jobs {
        match job.status {
            JobStatus::Completed => totals.completed += 1,
            JobStatus::Failed => totals.failed += 1,
            JobStatus::Pending | JobStatus::Running => {}
        }
        match job.category {
            JobCategory::Inference => totals.inference += 1,
            JobCategory::Training => totals.training += 1,
        }
        totals.tokens_processed += job.tokens_processed;
        if let (JobStatus::Completed, Some(duration)) = (job.status, job.duration) {
            duration_sum += duration;
            timed += 1;
        }
    }
    if timed > 0 {
        totals.mean_duration_seconds = Some(duration_sum / timed as f64);
    }
    totals
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub rack: String,
    pub gpu_model: String,
    pub ticks: u64,
    pub scheduling_policy: SchedulingPolicy,
    pub performance_mode: PerformanceMode,
    pub stats: RackStats,
    pub peak_tokens_per_second: f64,
    pub throughput_history: Vec<f64>,
    pub recent_jobs: JobTotals,
    pub completed_jobs: Vec<JobSnapshot>,
    pub accelerators: Vec<AcceleratorSnapshot>,
}

impl RunSummary {
    pub fn collect<R: Rng>(sim: &Sim<R>, config: &RackConfig) -> Self {
        let history = sim.throughput_history();
        let completed_jobs = sim.completed_jobs(SUMMARY_JOB_WINDOW);
        RunSummary {
            rack: config.rack.name.clone(),
            gpu_model: config.gpu.model_name.clone(),
            ticks: sim.ticks(),
            scheduling_policy: config.sim.scheduling_policy,
            performance_mode: config.sim.performance_mode,
            stats: sim.stats(config),
            peak_tokens_per_second: history.iter().copied().fold(0.0, f64::max),
            recent_jobs: summarize_jobs(&completed_jobs),
            throughput_history: history,
            completed_jobs,
            accelerators: sim.accelerator_states(config),
        }
    }
}

/// Writes `summary` as pretty JSON, creating parent directories as needed.
pub fn write_summary(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let payload = serde_json::to_string_pretty(summary).context("cannot serialize run summary")?;
    fs::write(path, payload).with_context(|| format!("cannot write {}", path.display()))
}

/// Output directory of one driver run: `<root>/run_<unix secs>_<pid>`, where
/// root is `GPURACK_PERF_LOG_DIR` or `performance_logs`.
#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
}

impl RunDir {
    pub fn create() -> anyhow::Result<Self> {
        let root = env::var_os(PERF_LOG_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("performance_logs"));
        Self::create_in(&root)
    }

    pub fn create_in(root: &Path) -> anyhow::Result<Self> {
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs());
        let path = root.join(format!("run_{}_{}", started, process::id()));
        fs::create_dir_all(&path)
            .with_context(|| format!("cannot create run directory {}", path.display()))?;
        Ok(RunDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join("summary.json")
    }

    pub fn stats_log(&self) -> anyhow::Result<StatsLog> {
        StatsLog::create(&self.path.join("stats.jsonl"))
    }
}

/// Whether `GPURACK_STATS_LOG` asks for per-tick stats lines.
pub fn stats_log_requested() -> bool {
    env::var(STATS_LOG_VAR).is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

#[derive(Debug, Serialize)]
struct StatsLine<'a> {
    tick: u64,
    #[serde(flatten)]
    stats: &'a RackStats,
}

/// Per-tick rack stats as JSON lines.
pub struct StatsLog {
    path: PathBuf,
    out: BufWriter<File>,
}

impl StatsLog {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        Ok(StatsLog {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, tick: u64, stats: &RackStats) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, &StatsLine { tick, stats })
            .with_context(|| format!("cannot append to {}", self.path.display()))?;
        self.out
            .write_all(b"\n")
            .with_context(|| format!("cannot append to {}", self.path.display()))
    }

    pub fn finish(mut self) -> anyhow::Result<()> {
        self.out
            .flush()
            .with_context(|| format!("cannot flush {}", self.path.display()))
    }
}
