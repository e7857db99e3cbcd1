use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Submission order.
    #[default]
    Fifo,
    /// Ascending total token count; ties keep submission order.
    SjfEstimated,
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "sjf" | "sjf_estimated" => Ok(Self::SjfEstimated),
            _ => Err(format!(
                "unsupported scheduling policy '{}', expected one of: fifo, sjf_estimated",
                value
            )),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingPolicy::Fifo => f.write_str("FIFO"),
            SchedulingPolicy::SjfEstimated => f.write_str("SJF_ESTIMATED"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    #[default]
    Theoretical,
    /// Applies the overhead factor to the processing budget and the
    /// interconnect penalty to communication-heavy jobs.
    Realistic,
}

impl FromStr for PerformanceMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "theoretical" => Ok(Self::Theoretical),
            "realistic" => Ok(Self::Realistic),
            _ => Err(format!(
                "unsupported performance mode '{}', expected one of: theoretical, realistic",
                value
            )),
        }
    }
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize config section"),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Run-wide settings. Read at the top of every tick, so changing a field
/// between ticks takes effect on the next one.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub tick_ms: f64,
    pub time_scale: f64,
    pub errors_enabled: bool,
    pub thermal_enabled: bool,
    pub scheduling_policy: SchedulingPolicy,
    pub performance_mode: PerformanceMode,
    pub realistic_performance_factor: f64,
    pub interconnect_bottleneck_factor: f64,
    pub tokens_per_batch: u64,
    pub max_concurrent_jobs_per_gpu: usize,
    pub error_chance_per_tick: f64,
    pub recovery_ticks: f64,
    pub history_length: usize,
    pub completed_history_limit: usize,
    pub seed: Option<u64>,
    pub log_level: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100.0,
            time_scale: 1.0,
            errors_enabled: true,
            thermal_enabled: true,
            scheduling_policy: SchedulingPolicy::Fifo,
            performance_mode: PerformanceMode::Theoretical,
            realistic_performance_factor: 0.75,
            interconnect_bottleneck_factor: 0.2,
            tokens_per_batch: 1024,
            max_concurrent_jobs_per_gpu: 4,
            error_chance_per_tick: 0.0005,
            recovery_ticks: 200.0,
            history_length: 100,
            completed_history_limit: 10_000,
            seed: None,
            log_level: 0,
        }
    }
}

impl SimConfig {
    pub fn tick_duration_seconds(&self) -> f64 {
        self.tick_ms / 1000.0
    }

    /// Fraction of the nominal processing budget available under the
    /// current performance mode.
    pub fn performance_multiplier(&self) -> f64 {
        match self.performance_mode {
            PerformanceMode::Theoretical => 1.0,
            PerformanceMode::Realistic => self.realistic_performance_factor,
        }
    }
}

/// Per-accelerator capacities and thermal model.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GpuConfig {
    pub model_name: String,
    pub memory_gb: f64,
    pub base_processing_units: f64,
    pub model_load_bandwidth_gb_per_tick: f64,
    pub base_power_watts: f64,
    pub max_power_watts: f64,
    pub throttle_threshold_load: f64,
    pub throttle_severity: f64,
    pub ticks_to_overheat: f64,
    pub ticks_to_cooldown: f64,
    pub cooldown_load_threshold: f64,
}

impl Config for GpuConfig {}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            model_name: "Blackwell B200 GPU (Simulated)".to_string(),
            memory_gb: 192.0,
            base_processing_units: 100.0,
            model_load_bandwidth_gb_per_tick: 0.2,
            base_power_watts: 100.0,
            max_power_watts: 1000.0,
            throttle_threshold_load: 85.0,
            throttle_severity: 0.25,
            ticks_to_overheat: 150.0,
            ticks_to_cooldown: 200.0,
            cooldown_load_threshold: 50.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TopologyConfig {
    pub name: String,
    pub superchips_per_rack: usize,
    pub gpus_per_superchip: usize,
}

impl Config for TopologyConfig {}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            name: "NVL72 Rack (Simulated)".to_string(),
            superchips_per_rack: 36,
            gpus_per_superchip: 2,
        }
    }
}

impl TopologyConfig {
    pub fn num_gpus(&self) -> usize {
        self.superchips_per_rack * self.gpus_per_superchip
    }
}

/// Everything the engine reads, passed explicitly into `initialize` and `tick`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RackConfig {
    pub sim: SimConfig,
    pub gpu: GpuConfig,
    pub rack: TopologyConfig,
}

impl RackConfig {
    pub fn from_table(table: &Table) -> anyhow::Result<Self> {
        Ok(Self {
            sim: SimConfig::from_section(table.get("sim")).context("in [sim]")?,
            gpu: GpuConfig::from_section(table.get("gpu")).context("in [gpu]")?,
            rack: TopologyConfig::from_section(table.get("rack")).context("in [rack]")?,
        })
    }

    pub fn from_toml_str(toml_string: &str) -> anyhow::Result<Self> {
        let table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
        Self::from_table(&table)
    }

    /// Checks the values the engine treats as well-formed.
    pub fn validate(&self) -> anyhow::Result<()> {
        let sim = &self.sim;
        let gpu = &self.gpu;
        if self.rack.num_gpus() == 0 {
            bail!("rack must contain at least one GPU");
        }
        if !(sim.tick_ms > 0.0) {
            bail!("tick_ms must be positive, got {}", sim.tick_ms);
        }
        if !(sim.time_scale >= 0.0) {
            bail!("time_scale must be non-negative, got {}", sim.time_scale);
        }
        if sim.max_concurrent_jobs_per_gpu == 0 {
            bail!("max_concurrent_jobs_per_gpu must be at least 1");
        }
        if sim.tokens_per_batch == 0 {
            bail!("tokens_per_batch must be at least 1");
        }
        if !(0.0..=1.0).contains(&sim.error_chance_per_tick) {
            bail!(
                "error_chance_per_tick must be within 0..=1, got {}",
                sim.error_chance_per_tick
            );
        }
        if !(0.0..=1.0).contains(&gpu.throttle_severity) {
            bail!(
                "throttle_severity must be within 0..=1, got {}",
                gpu.throttle_severity
            );
        }
        if gpu.memory_gb < 0.0 || gpu.base_processing_units < 0.0 {
            bail!("GPU capacities must be non-negative");
        }
        if gpu.max_power_watts < gpu.base_power_watts {
            bail!(
                "max_power_watts ({}) is below base_power_watts ({})",
                gpu.max_power_watts,
                gpu.base_power_watts
            );
        }
        Ok(())
    }
}
