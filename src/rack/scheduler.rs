//! Per-tick assignment of pending jobs to accelerators.
//!
//! This is a single greedy pass, not an optimal bin packing: every
//! accelerator with a free slot, in pool order, takes the first job of the
//! policy-ordered queue that fits its remaining memory. A job skipped by one
//! accelerator is still offered to the ones after it, and to everyone again
//! next tick. Each accelerator receives at most one job per tick.
//!
//! Under `SjfEstimated` the queue is re-sorted every tick, so a large job can
//! wait indefinitely behind a steady stream of smaller ones.

use log::{debug, warn};

use crate::rack::accelerator::Accelerator;
use crate::sim::config::{RackConfig, SchedulingPolicy};
use crate::workload::job::{Job, JobId};

impl SchedulingPolicy {
    /// Order in which the pending queue is offered to accelerators.
    pub fn order(&self, pending: &[Job]) -> Vec<JobId> {
        match self {
            SchedulingPolicy::Fifo => pending.iter().map(|job| job.id).collect(),
            SchedulingPolicy::SjfEstimated => {
                let mut ordered: Vec<&Job> = pending.iter().collect();
                // stable: equal sizes keep submission order
                ordered.sort_by_key(|job| job.total_tokens);
                ordered.into_iter().map(|job| job.id).collect()
            }
        }
    }
}

/// One assignment made by [`assign_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub job: JobId,
    pub accelerator: usize,
}

/// Moves pending jobs onto accelerators with room for them.
pub fn assign_pending(
    pending: &mut Vec<Job>,
    accelerators: &mut [Accelerator],
    config: &RackConfig,
    now: f64,
) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    if pending.is_empty() {
        return assignments;
    }

    let policy = config.sim.scheduling_policy;
    let mut candidates = policy.order(pending);

    for (index, accelerator) in accelerators.iter_mut().enumerate() {
        if pending.is_empty() {
            break;
        }
        if !accelerator.has_free_slot(config) {
            continue;
        }

        let chosen = candidates.iter().position(|id| {
            pending
                .iter()
                .find(|job| job.id == *id)
                .is_some_and(|job| accelerator.has_room_for(job, config))
        });
        let Some(candidate_pos) = chosen else {
            continue;
        };
        let job_id = candidates.remove(candidate_pos);
        let Some(queue_pos) = pending.iter().position(|job| job.id == job_id) else {
            continue;
        };

        let job = pending.remove(queue_pos);
        match accelerator.admit(job, config, now) {
            Ok(()) => {
                debug!("assigned {} to {} ({})", job_id, accelerator.id, policy);
                assignments.push(Assignment {
                    job: job_id,
                    accelerator: index,
                });
            }
            Err(job) => {
                warn!("{} refused {} after fitting it", accelerator.id, job.id);
                pending.insert(queue_pos, job);
            }
        }
    }

    assignments
}
