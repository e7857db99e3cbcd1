pub mod accelerator;
pub mod scheduler;
pub mod stats;

pub use accelerator::{
    Accelerator, AcceleratorId, AcceleratorSnapshot, AcceleratorStatus, JobBatch, ThermalState,
};
pub use scheduler::{assign_pending, Assignment};
pub use stats::{QueueCounts, RackStats, ThroughputHistory};
