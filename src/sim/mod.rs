pub mod config;
pub mod error;
pub mod log;
pub mod perf_log;
pub mod top;

pub use config::{
    Config, GpuConfig, PerformanceMode, RackConfig, SchedulingPolicy, SimConfig, TopologyConfig,
};
pub use error::SimError;
pub use top::Sim;

#[cfg(test)]
mod unit_tests;
