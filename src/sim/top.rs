//! Top-level simulation engine.
//!
//! Owns the accelerator pool, the pending queue and the completed list. Every
//! job lives in exactly one of those containers. Configuration is never held
//! across ticks; callers pass the current [`RackConfig`] into each call.

use std::collections::VecDeque;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::rack::accelerator::{Accelerator, AcceleratorId, AcceleratorSnapshot, AcceleratorStatus};
use crate::rack::scheduler::assign_pending;
use crate::rack::stats::{self, QueueCounts, RackStats, ThroughputHistory};
use crate::sim::config::RackConfig;
use crate::sim::error::SimError;
use crate::workload::catalog;
use crate::workload::job::{FailureCause, Job, JobId, JobSnapshot, JobSpec, JobStatus};

/// Target epochs of a catalog training workload, 1 for anything else.
fn catalog_epochs(key: &str) -> u64 {
    catalog::lookup(key)
        .and_then(|workload| workload.training)
        .map_or(1, |profile| u64::from(profile.target_epochs.max(1)))
}

pub struct Sim<R = StdRng> {
    accelerators: Vec<Accelerator>,
    pending: Vec<Job>,
    completed: VecDeque<Job>,
    /// Jobs that ever reached a terminal state, including evicted ones.
    finished_total: u64,
    failed_total: u64,
    next_job_id: u64,
    clock: f64,
    ticks: u64,
    history: ThroughputHistory,
    rng: R,
}

impl Sim<StdRng> {
    /// Builds and initializes an engine. Failure injection is seeded from
    /// `sim.seed` when set, from OS entropy otherwise.
    pub fn new(config: &RackConfig) -> Self {
        let rng = match config.sim.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }
}

impl<R: Rng> Sim<R> {
    pub fn with_rng(config: &RackConfig, rng: R) -> Self {
        let mut sim = Sim {
            accelerators: Vec::new(),
            pending: Vec::new(),
            completed: VecDeque::new(),
            finished_total: 0,
            failed_total: 0,
            next_job_id: 0,
            clock: 0.0,
            ticks: 0,
            history: ThroughputHistory::new(),
            rng,
        };
        sim.initialize(config);
        sim
    }

    /// Rebuilds the pool, clears every queue and the clock, and seeds the
    /// example jobs.
    pub fn initialize(&mut self, config: &RackConfig) {
        self.reset(config);

        let batch = config.sim.tokens_per_batch;
        let seeds = [
            ("default", batch * 10),
            ("trainingLargeModel", batch * 2 * catalog_epochs("trainingLargeModel")),
            ("fineTuningSmallModel", batch * catalog_epochs("fineTuningSmallModel")),
            ("lowLatencyInference", batch * 5),
        ];
        for (key, tokens) in seeds {
            if let Err(err) = self.submit_job(&JobSpec::catalog(key, Some(tokens))) {
                warn!("could not seed example job '{}': {}", key, err);
            }
        }
        info!(
            "initialized {} with {} GPUs, {} pending jobs",
            config.rack.name,
            self.accelerators.len(),
            self.pending.len()
        );
    }

    /// Like [`Sim::initialize`] but leaves the pending queue empty.
    pub fn reset(&mut self, config: &RackConfig) {
        self.accelerators = (0..config.rack.num_gpus())
            .map(|index| Accelerator::new(index, &config.gpu))
            .collect();
        self.pending.clear();
        self.completed.clear();
        self.finished_total = 0;
        self.failed_total = 0;
        self.next_job_id = 0;
        self.clock = 0.0;
        self.ticks = 0;
        self.history.clear();
    }

    /// Executes one simulation step.
    pub fn tick(&mut self, config: &RackConfig) {
        self.clock += config.sim.tick_duration_seconds() * config.sim.time_scale;
        self.ticks += 1;
        let now = self.clock;

        assign_pending(&mut self.pending, &mut self.accelerators, config, now);

        let mut failed = Vec::new();
        for accelerator in self.accelerators.iter_mut() {
            failed.extend(accelerator.process_tick(config, now, &mut self.rng));
        }
        for job in failed {
            self.retire(job, config);
        }

        let mut done = Vec::new();
        for accelerator in self.accelerators.iter_mut() {
            for job in accelerator.harvest_completed() {
                debug!(
                    "{} completed on {} in {:.2}s",
                    job.id,
                    accelerator.id,
                    job.duration().unwrap_or(0.0)
                );
                done.push(job);
            }
        }
        for job in done {
            self.retire(job, config);
        }

        let tokens_per_second = self.stats(config).tokens_per_second;
        self.history.push(tokens_per_second, config.sim.history_length);
    }

    /// Appends a terminal job to the bounded completed list.
    fn retire(&mut self, job: Job, config: &RackConfig) {
        self.finished_total += 1;
        if job.status == JobStatus::Failed {
            self.failed_total += 1;
        }
        self.completed.push_back(job);
        while self.completed.len() > config.sim.completed_history_limit {
            self.completed.pop_front();
        }
    }

    /// Queues a new job and returns its id. Rejected submissions leave the engine
    /// untouched, including the id counter.
    pub fn submit_job(&mut self, spec: &JobSpec) -> Result<JobId, SimError> {
        let id = JobId(self.next_job_id);
        let job = Job::from_spec(id, spec, self.clock)?;
        self.next_job_id += 1;
        info!(
            "queued {} ({}, {} tokens, {}B params, {})",
            job.id, job.type_label, job.total_tokens, job.parameters_billion, job.precision
        );
        self.pending.push(job);
        Ok(id)
    }

    /// Forces a uniformly chosen healthy accelerator into the error state.
    pub fn trigger_manual_failure(&mut self, config: &RackConfig) -> Result<AcceleratorId, SimError> {
        if !config.sim.errors_enabled {
            return Err(SimError::FeatureDisabled("GPU errors"));
        }
        let healthy: Vec<usize> = self
            .accelerators
            .iter()
            .enumerate()
            .filter(|(_, gpu)| gpu.status() != AcceleratorStatus::Error)
            .map(|(index, _)| index)
            .collect();
        if healthy.is_empty() {
            return Err(SimError::NoHealthyAccelerators);
        }

        let index = healthy[self.rng.gen_range(0..healthy.len())];
        let now = self.clock;
        let accelerator = &mut self.accelerators[index];
        let id = accelerator.id;
        warn!("manual trigger: forcing {} into the error state", id);
        let failed = accelerator.fail(FailureCause::ManualTrigger, &config.gpu, now);
        for job in failed {
            self.retire(job, config);
        }
        Ok(id)
    }

    /// Recovers every accelerator in the error state, bypassing the
    /// countdown. Returns how many were recovered.
    pub fn clear_all_errors(&mut self, config: &RackConfig) -> usize {
        let mut recovered = 0;
        for accelerator in self
            .accelerators
            .iter_mut()
            .filter(|gpu| gpu.status() == AcceleratorStatus::Error)
        {
            accelerator.force_recover(&config.gpu);
            info!("{}: force recovered", accelerator.id);
            recovered += 1;
        }
        recovered
    }

    pub fn simulation_time(&self) -> f64 {
        self.clock
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn accelerators(&self) -> &[Accelerator] {
        &self.accelerators
    }

    pub fn accelerator_states(&self, config: &RackConfig) -> Vec<AcceleratorSnapshot> {
        self.accelerators
            .iter()
            .map(|gpu| gpu.snapshot(config))
            .collect()
    }

    pub fn pending_jobs(&self) -> Vec<JobSnapshot> {
        self.pending.iter().map(Job::snapshot).collect()
    }

    /// The most recent `limit` finished jobs, oldest first.
    pub fn completed_jobs(&self, limit: usize) -> Vec<JobSnapshot> {
        let skip = self.completed.len().saturating_sub(limit);
        self.completed.iter().skip(skip).map(Job::snapshot).collect()
    }

    pub fn stats(&self, config: &RackConfig) -> RackStats {
        let queues = QueueCounts {
            pending: self.pending.len(),
            completed: self.finished_total,
            failed: self.failed_total,
        };
        stats::collect(&self.accelerators, queues, self.clock, config)
    }

    pub fn throughput_history(&self) -> Vec<f64> {
        self.history.to_vec()
    }
}
