use std::collections::VecDeque;

use serde::Serialize;

use crate::rack::accelerator::{Accelerator, AcceleratorStatus};
use crate::sim::config::RackConfig;

/// Point-in-time summary of the rack.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RackStats {
    pub simulation_time: f64,
    pub active_gpus: usize,
    pub error_gpus: usize,
    pub throttled_gpus: usize,
    pub total_gpus: usize,
    /// Mean load over accelerators not in the error state.
    pub avg_gpu_load: f64,
    pub total_memory_used_gb: f64,
    pub total_memory_capacity_gb: f64,
    pub total_power_watts: f64,
    pub pending_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub tokens_processed_this_tick: f64,
    pub tokens_per_second: f64,
    pub time_scale: f64,
}

/// Queue-side counts that the accelerators do not know about.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
}

pub fn collect(
    accelerators: &[Accelerator],
    queues: QueueCounts,
    simulation_time: f64,
    config: &RackConfig,
) -> RackStats {
    let healthy = || {
        accelerators
            .iter()
            .filter(|gpu| gpu.status() != AcceleratorStatus::Error)
    };

    let error_gpus = accelerators.len() - healthy().count();
    let healthy_count = accelerators.len() - error_gpus;
    let avg_gpu_load = if healthy_count > 0 {
        healthy().map(Accelerator::current_load).sum::<f64>() / healthy_count as f64
    } else {
        0.0
    };
    let tokens_processed_this_tick: f64 =
        healthy().map(Accelerator::tokens_processed_this_tick).sum();
    let tick_seconds = config.sim.tick_duration_seconds();
    let tokens_per_second = if tick_seconds > 0.0 {
        tokens_processed_this_tick / tick_seconds
    } else {
        0.0
    };

    RackStats {
        simulation_time,
        active_gpus: accelerators
            .iter()
            .filter(|gpu| gpu.status() == AcceleratorStatus::Busy)
            .count(),
        error_gpus,
        throttled_gpus: accelerators.iter().filter(|gpu| gpu.is_throttled()).count(),
        total_gpus: accelerators.len(),
        avg_gpu_load,
        total_memory_used_gb: accelerators.iter().map(Accelerator::memory_used_gb).sum(),
        total_memory_capacity_gb: accelerators.len() as f64 * config.gpu.memory_gb,
        total_power_watts: accelerators.iter().map(Accelerator::power_watts).sum(),
        pending_jobs: queues.pending,
        completed_jobs: queues.completed,
        failed_jobs: queues.failed,
        tokens_processed_this_tick,
        tokens_per_second,
        time_scale: config.sim.time_scale,
    }
}

/// Fixed-capacity ring of recent tokens/sec samples, oldest evicted first.
#[derive(Debug, Clone, Default)]
pub struct ThroughputHistory {
    samples: VecDeque<f64>,
}

impl ThroughputHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `sample`, then trims to `capacity`. Capacity is read per call
    /// so that a configuration change applies on the next tick.
    pub fn push(&mut self, sample: f64, capacity: usize) {
        self.samples.push_back(sample);
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}
