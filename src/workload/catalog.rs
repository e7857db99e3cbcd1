//! Predefined workload types that can be submitted by key.
//!
//! Memory footprint and per-token compute demand are not stored here; they are
//! derived from the parameter count and precision when a job is built.

use phf::phf_map;

use crate::workload::job::{JobCategory, TrainingProfile};
use crate::workload::precision::Precision;

pub const DEFAULT_WORKLOAD: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkloadSpec {
    /// Human-readable description shown in workload listings.
    pub name: &'static str,
    pub parameters_billion: f64,
    pub precision: Precision,
    pub base_ops_per_token: f64,
    /// How strongly interconnect bottlenecks inflate per-token cost, 0..=1.
    pub communication_intensity: f64,
    /// Present for training workloads only.
    pub training: Option<TrainingProfile>,
}

impl WorkloadSpec {
    pub fn category(&self) -> JobCategory {
        match self.training {
            Some(_) => JobCategory::Training,
            None => JobCategory::Inference,
        }
    }
}

static WORKLOADS: phf::Map<&'static str, WorkloadSpec> = phf_map! {
    "default" => WorkloadSpec {
        name: "Inference: Small LLM (7B, FP16)",
        parameters_billion: 7.0,
        precision: Precision::FP16,
        base_ops_per_token: 2.0,
        communication_intensity: 0.1,
        training: None,
    },
    "highDemandInference" => WorkloadSpec {
        name: "Inference: Large LLM (70B, FP16)",
        parameters_billion: 70.0,
        precision: Precision::FP16,
        base_ops_per_token: 2.0,
        communication_intensity: 0.3,
        training: None,
    },
    "lowLatencyInference" => WorkloadSpec {
        name: "Inference: Small LLM (7B, INT8)",
        parameters_billion: 7.0,
        precision: Precision::INT8,
        base_ops_per_token: 2.0,
        communication_intensity: 0.05,
        training: None,
    },
    "imageGen" => WorkloadSpec {
        name: "Inference: Image Gen (15B, FP16)",
        parameters_billion: 15.0,
        precision: Precision::FP16,
        base_ops_per_token: 100.0,
        communication_intensity: 0.2,
        training: None,
    },
    "trainingLargeModel" => WorkloadSpec {
        name: "Training: Foundational LLM (175B, BF16)",
        parameters_billion: 175.0,
        precision: Precision::BF16,
        base_ops_per_token: 6.0,
        communication_intensity: 0.5,
        training: Some(TrainingProfile {
            target_epochs: 3,
            initial_loss: 5.0,
            loss_reduction_per_epoch: 0.7,
        }),
    },
    "fineTuningSmallModel" => WorkloadSpec {
        name: "Training: Fine-tune LLM (7B, FP16)",
        parameters_billion: 7.0,
        precision: Precision::FP16,
        base_ops_per_token: 6.0,
        communication_intensity: 0.2,
        training: Some(TrainingProfile {
            target_epochs: 5,
            initial_loss: 2.5,
            loss_reduction_per_epoch: 0.3,
        }),
    },
    "modelLoadingTest" => WorkloadSpec {
        name: "Util: Model Load Test (1B, FP32)",
        parameters_billion: 1.0,
        precision: Precision::FP32,
        base_ops_per_token: 0.01,
        communication_intensity: 0.0,
        training: None,
    },
};

pub fn lookup(key: &str) -> Option<&'static WorkloadSpec> {
    WORKLOADS.get(key)
}

/// The entry used when a caller asks for a key the catalog does not have.
pub fn default_workload() -> &'static WorkloadSpec {
    &WORKLOADS[DEFAULT_WORKLOAD]
}

/// All catalog keys, sorted for stable listing.
pub fn keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = WORKLOADS.keys().copied().collect();
    keys.sort_unstable();
    keys
}
