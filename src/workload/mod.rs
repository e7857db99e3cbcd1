pub mod catalog;
pub mod job;
pub mod precision;

pub use catalog::WorkloadSpec;
pub use job::{CustomJob, Job, JobCategory, JobDetail, JobId, JobSnapshot, JobSpec, JobStatus};
pub use precision::Precision;

#[cfg(test)]
mod unit_tests;
