//! A single accelerator in the rack.
//!
//! Each tick runs a fixed sequence: error countdown, random failure
//! injection, model loading, provisional load, thermal transition, token
//! processing, power update. Jobs that finish are flagged `completed` but
//! stay in the active set until the engine harvests them after every
//! accelerator has ticked.

use std::fmt;

use log::{debug, info, warn};
use rand::Rng;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::sim::config::{GpuConfig, RackConfig};
use crate::workload::job::{FailureCause, Job, JobSnapshot, JobStatus};

/// Load reported while jobs are present but none is consuming tokens.
pub const NOMINAL_LOAD: f64 = 5.0;
/// Power multiplier while throttled but still doing work.
const THROTTLED_POWER_FACTOR: f64 = 0.9;
/// Power multiplier while in the error state.
const ERROR_POWER_FACTOR: f64 = 0.5;

pub type JobBatch = SmallVec<[Job; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcceleratorId(pub usize);

impl fmt::Display for AcceleratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu-{}", self.0)
    }
}

impl Serialize for AcceleratorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorStatus {
    Idle,
    Busy,
    Error,
}

impl fmt::Display for AcceleratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorStatus::Idle => f.write_str("idle"),
            AcceleratorStatus::Busy => f.write_str("busy"),
            AcceleratorStatus::Error => f.write_str("error"),
        }
    }
}

/// At most one of the two counters is non-zero at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThermalState {
    pub is_throttled: bool,
    pub ticks_at_high_load: f64,
    pub ticks_cooling_down: f64,
}

impl ThermalState {
    fn reset(&mut self) {
        *self = ThermalState::default();
    }
}

#[derive(Debug, Clone)]
pub struct Accelerator {
    pub id: AcceleratorId,
    status: AcceleratorStatus,
    current_load: f64,
    memory_used_gb: f64,
    active_jobs: Vec<Job>,
    power_watts: f64,
    thermal: ThermalState,
    ticks_in_error_state: f64,
    /// Budget used for token processing in the last tick, after throttling.
    effective_budget: f64,
    tokens_processed_this_tick: f64,
    total_tokens_processed: f64,
}

impl Accelerator {
    pub fn new(index: usize, gpu: &GpuConfig) -> Self {
        Accelerator {
            id: AcceleratorId(index),
            status: AcceleratorStatus::Idle,
            current_load: 0.0,
            memory_used_gb: 0.0,
            active_jobs: Vec::new(),
            power_watts: gpu.base_power_watts,
            thermal: ThermalState::default(),
            ticks_in_error_state: 0.0,
            effective_budget: 0.0,
            tokens_processed_this_tick: 0.0,
            total_tokens_processed: 0.0,
        }
    }

    pub fn status(&self) -> AcceleratorStatus {
        self.status
    }

    pub fn current_load(&self) -> f64 {
        self.current_load
    }

    pub fn memory_used_gb(&self) -> f64 {
        self.memory_used_gb
    }

    pub fn active_jobs(&self) -> &[Job] {
        &self.active_jobs
    }

    pub fn power_watts(&self) -> f64 {
        self.power_watts
    }

    pub fn thermal(&self) -> &ThermalState {
        &self.thermal
    }

    pub fn is_throttled(&self) -> bool {
        self.thermal.is_throttled
    }

    pub fn ticks_in_error_state(&self) -> f64 {
        self.ticks_in_error_state
    }

    pub fn effective_budget(&self) -> f64 {
        self.effective_budget
    }

    pub fn tokens_processed_this_tick(&self) -> f64 {
        self.tokens_processed_this_tick
    }

    pub fn total_tokens_processed(&self) -> f64 {
        self.total_tokens_processed
    }

    fn fits(&self, job: &Job, config: &RackConfig) -> bool {
        self.memory_used_gb + job.memory_footprint_gb() <= config.gpu.memory_gb
            && self.active_jobs.len() < config.sim.max_concurrent_jobs_per_gpu
    }

    /// Strict admission check: only a fully idle accelerator qualifies.
    ///
    /// Narrower than [`Accelerator::has_room_for`], which is what the scheduler
    /// uses and what allows several jobs to share one accelerator.
    pub fn can_accept(&self, job: &Job, config: &RackConfig) -> bool {
        self.status == AcceleratorStatus::Idle && self.fits(job, config)
    }

    /// Scheduler admission check: idle or busy, with memory and a slot free.
    pub fn has_room_for(&self, job: &Job, config: &RackConfig) -> bool {
        self.status != AcceleratorStatus::Error && self.fits(job, config)
    }

    /// Whether the scheduler should consider this accelerator at all.
    pub fn has_free_slot(&self, config: &RackConfig) -> bool {
        self.status != AcceleratorStatus::Error
            && self.active_jobs.len() < config.sim.max_concurrent_jobs_per_gpu
    }

    /// Reserves memory and a slot for `job`. Hands the job back if it does not fit.
    pub fn admit(&mut self, mut job: Job, config: &RackConfig, now: f64) -> Result<(), Job> {
        if !self.has_room_for(&job, config) {
            return Err(job);
        }
        self.memory_used_gb += job.memory_footprint_gb();
        self.status = AcceleratorStatus::Busy;
        job.start(self.id, config.gpu.model_load_bandwidth_gb_per_tick, now);
        debug!(
            "{}: admitted {} ({:.1} GB, {} load ticks)",
            self.id,
            job.id,
            job.memory_footprint_gb(),
            job.model_load_ticks
        );
        self.active_jobs.push(job);
        Ok(())
    }

    /// Advances this accelerator by one tick. Returns the jobs failed by a
    /// hardware error this tick; they are no longer held by the accelerator.
    pub fn process_tick<R: Rng>(
        &mut self,
        config: &RackConfig,
        now: f64,
        rng: &mut R,
    ) -> JobBatch {
        let sim = &config.sim;
        let gpu = &config.gpu;
        self.tokens_processed_this_tick = 0.0;
        self.effective_budget = 0.0;
        self.power_watts = gpu.base_power_watts;

        if self.status == AcceleratorStatus::Error {
            if !sim.errors_enabled {
                info!("{}: recovered, errors are disabled", self.id);
                self.force_recover(gpu);
            } else {
                self.ticks_in_error_state += sim.time_scale;
                self.current_load = 0.0;
                self.power_watts = gpu.base_power_watts * ERROR_POWER_FACTOR;
                if self.ticks_in_error_state >= sim.recovery_ticks {
                    self.status = AcceleratorStatus::Idle;
                    self.ticks_in_error_state = 0.0;
                    info!("{}: recovered from error", self.id);
                }
                self.thermal.reset();
                return JobBatch::new();
            }
        }

        if sim.errors_enabled && rng.gen::<f64>() < sim.error_chance_per_tick * sim.time_scale {
            warn!("{}: hardware error", self.id);
            return self.fail(FailureCause::HardwareError, gpu, now);
        }

        for job in self.active_jobs.iter_mut().filter(|j| !j.admitted_this_tick) {
            if job.advance_load(sim.time_scale, now) {
                debug!("{}: {} finished loading", self.id, job.id);
            }
        }

        let budget = gpu.base_processing_units * sim.performance_multiplier() * sim.time_scale;
        let processing = self.active_jobs.iter().filter(|j| j.is_processing()).count();

        self.current_load = self.provisional_load(config, budget, processing);
        let effective_budget = self.update_thermal(config, budget);
        self.effective_budget = effective_budget;

        if processing > 0 {
            let share = effective_budget / processing as f64;
            for job in self.active_jobs.iter_mut().filter(|j| j.is_processing()) {
                let demand = job.effective_demand_per_token(
                    sim.performance_mode,
                    sim.interconnect_bottleneck_factor,
                );
                let tokens = job.tokens_remaining.min(share / demand.max(1.0));
                if tokens > 0.0 {
                    if let Some(epoch) = job.consume(tokens) {
                        if let Some(training) = job.training() {
                            info!(
                                "{}: {} completed epoch {}, loss {:.3}",
                                self.id, job.id, epoch, training.current_loss
                            );
                        }
                    }
                    self.tokens_processed_this_tick += tokens;
                    self.total_tokens_processed += tokens;
                }
                if job.tokens_remaining <= 0.0 {
                    job.mark_completed(now);
                }
            }
        }

        for job in self.active_jobs.iter_mut() {
            job.admitted_this_tick = false;
        }

        self.update_power(gpu);
        JobBatch::new()
    }

    /// Demand the active jobs would place on the unthrottled budget, as a
    /// percentage of it.
    fn provisional_load(&self, config: &RackConfig, budget: f64, processing: usize) -> f64 {
        if processing == 0 {
            return if self.active_jobs.is_empty() { 0.0 } else { NOMINAL_LOAD };
        }
        if budget <= 0.0 {
            return 0.0;
        }
        let sim = &config.sim;
        let share = budget / processing as f64;
        let demand_met: f64 = self
            .active_jobs
            .iter()
            .filter(|j| j.is_processing())
            .map(|job| {
                let demand = job.effective_demand_per_token(
                    sim.performance_mode,
                    sim.interconnect_bottleneck_factor,
                );
                demand * job.tokens_remaining.min(share / demand.max(1.0))
            })
            .sum();
        (demand_met / budget * 100.0).clamp(0.0, 100.0)
    }

    /// Steps the thermal state machine against `current_load` and returns the
    /// budget available for token processing this tick.
    fn update_thermal(&mut self, config: &RackConfig, budget: f64) -> f64 {
        let sim = &config.sim;
        let gpu = &config.gpu;
        if !sim.thermal_enabled {
            self.thermal.reset();
            return budget;
        }

        let thermal = &mut self.thermal;
        if thermal.is_throttled {
            let throttled_budget = budget * (1.0 - gpu.throttle_severity);
            if self.current_load < gpu.cooldown_load_threshold {
                thermal.ticks_cooling_down += sim.time_scale;
                thermal.ticks_at_high_load = 0.0;
                if thermal.ticks_cooling_down >= gpu.ticks_to_cooldown {
                    thermal.is_throttled = false;
                    thermal.ticks_cooling_down = 0.0;
                    info!("{}: cooled down, no longer throttled", self.id);
                }
            } else {
                thermal.ticks_cooling_down = 0.0;
            }
            throttled_budget
        } else {
            if self.current_load > gpu.throttle_threshold_load {
                thermal.ticks_at_high_load += sim.time_scale;
                thermal.ticks_cooling_down = 0.0;
                if thermal.ticks_at_high_load >= gpu.ticks_to_overheat {
                    thermal.is_throttled = true;
                    thermal.ticks_at_high_load = 0.0;
                    warn!("{}: thermally throttled after sustained high load", self.id);
                }
            } else {
                thermal.ticks_at_high_load = 0.0;
                thermal.ticks_cooling_down = 0.0;
            }
            budget
        }
    }

    fn update_power(&mut self, gpu: &GpuConfig) {
        match self.status {
            AcceleratorStatus::Busy if self.current_load > 0.0 => {
                let load_fraction = self.current_load / 100.0;
                self.power_watts = gpu.base_power_watts
                    + (gpu.max_power_watts - gpu.base_power_watts) * load_fraction;
                if self.thermal.is_throttled {
                    self.power_watts *= THROTTLED_POWER_FACTOR;
                }
            }
            AcceleratorStatus::Idle => self.power_watts = gpu.base_power_watts,
            _ => {}
        }
    }

    /// Forces the accelerator into the error state. Every held job is
    /// released and returned marked `failed`; nothing is retried.
    pub fn fail(&mut self, cause: FailureCause, gpu: &GpuConfig, now: f64) -> JobBatch {
        self.status = AcceleratorStatus::Error;
        self.ticks_in_error_state = 0.0;
        self.current_load = 0.0;
        self.power_watts = gpu.base_power_watts * ERROR_POWER_FACTOR;
        self.thermal.reset();

        let mut failed = JobBatch::new();
        for mut job in self.active_jobs.drain(..) {
            if !job.is_finished() {
                job.mark_failed(cause, now);
            }
            info!("{}: {} {}", self.id, job.id, job.detail);
            failed.push(job);
        }
        self.memory_used_gb = 0.0;
        failed
    }

    /// Returns to idle immediately, bypassing the recovery countdown.
    pub fn force_recover(&mut self, gpu: &GpuConfig) {
        self.status = AcceleratorStatus::Idle;
        self.ticks_in_error_state = 0.0;
        self.current_load = 0.0;
        self.power_watts = gpu.base_power_watts;
        self.thermal.reset();
    }

    /// Removes jobs flagged completed during the last tick. Restores idle
    /// when nothing is left.
    pub fn harvest_completed(&mut self) -> JobBatch {
        let mut done = JobBatch::new();
        let mut i = 0;
        while i < self.active_jobs.len() {
            if self.active_jobs[i].status == JobStatus::Completed {
                let job = self.active_jobs.remove(i);
                self.memory_used_gb -= job.memory_footprint_gb();
                done.push(job);
            } else {
                i += 1;
            }
        }
        if self.active_jobs.is_empty() {
            self.memory_used_gb = 0.0;
            if self.status == AcceleratorStatus::Busy {
                self.status = AcceleratorStatus::Idle;
                self.current_load = 0.0;
            }
        }
        done
    }

    pub fn snapshot(&self, config: &RackConfig) -> AcceleratorSnapshot {
        AcceleratorSnapshot {
            id: self.id,
            status: self.status,
            current_load: self.current_load,
            memory_used_gb: self.memory_used_gb,
            memory_capacity_gb: config.gpu.memory_gb,
            power_watts: self.power_watts,
            is_throttled: self.thermal.is_throttled,
            ticks_at_high_load: self.thermal.ticks_at_high_load.floor() as u64,
            ticks_cooling_down: self.thermal.ticks_cooling_down.floor() as u64,
            active_jobs: self.active_jobs.iter().map(Job::snapshot).collect(),
            tokens_processed_this_tick: self.tokens_processed_this_tick,
            total_tokens_processed: self.total_tokens_processed,
            ticks_in_error_state: self.ticks_in_error_state.floor() as u64,
            recovery_ticks: config.sim.recovery_ticks,
        }
    }
}

/// Owned, read-only view of an accelerator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceleratorSnapshot {
    pub id: AcceleratorId,
    pub status: AcceleratorStatus,
    pub current_load: f64,
    pub memory_used_gb: f64,
    pub memory_capacity_gb: f64,
    pub power_watts: f64,
    pub is_throttled: bool,
    pub ticks_at_high_load: u64,
    pub ticks_cooling_down: u64,
    pub active_jobs: Vec<JobSnapshot>,
    pub tokens_processed_this_tick: f64,
    pub total_tokens_processed: f64,
    pub ticks_in_error_state: u64,
    pub recovery_ticks: f64,
}
