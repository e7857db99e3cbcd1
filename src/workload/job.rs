use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize, Serializer};

use crate::rack::accelerator::AcceleratorId;
use crate::sim::config::PerformanceMode;
use crate::sim::error::SimError;
use crate::workload::catalog::{self, DEFAULT_WORKLOAD};
use crate::workload::precision::Precision;

/// Floor applied to a derived per-token compute demand that comes out non-positive.
pub const MIN_COMPUTE_DEMAND: f64 = 0.1;
/// Token count for catalog jobs submitted without an override.
pub const DEFAULT_TOTAL_TOKENS: u64 = 10_000;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    #[default]
    Inference,
    Training,
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobCategory::Inference => f.write_str("inference"),
            JobCategory::Training => f.write_str("training"),
        }
    }
}

/// Static description of a training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingProfile {
    pub target_epochs: u32,
    pub initial_loss: f64,
    pub loss_reduction_per_epoch: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingProgress {
    pub profile: TrainingProfile,
    pub current_epoch: u32,
    pub current_loss: f64,
}

impl TrainingProgress {
    fn new(profile: TrainingProfile) -> Self {
        Self {
            profile,
            current_epoch: 0,
            current_loss: profile.initial_loss,
        }
    }

    /// Recomputes the completed-epoch count from cumulative progress.
    /// Returns the new epoch when a boundary was crossed.
    fn advance(&mut self, tokens_processed: f64, total_tokens: u64) -> Option<u32> {
        if total_tokens == 0 {
            return None;
        }
        let epochs = self.profile.target_epochs.max(1);
        // processed == total must give exactly `epochs`.
        let epoch = ((tokens_processed * epochs as f64 / total_tokens as f64).floor() as u32).min(epochs);
        if epoch <= self.current_epoch {
            return None;
        }
        self.current_epoch = epoch;
        self.current_loss = (self.profile.initial_loss
            - epoch as f64 * self.profile.loss_reduction_per_epoch)
            .max(0.0);
        Some(epoch)
    }
}

/// Category tag plus the state only that category carries.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Inference,
    Training(TrainingProgress),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("pending"),
            JobStatus::Running => f.write_str("running"),
            JobStatus::Completed => f.write_str("completed"),
            JobStatus::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    HardwareError,
    ManualTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDetail {
    PendingQueue,
    LoadingModel,
    Processing,
    Completed,
    Failed(FailureCause),
}

impl fmt::Display for JobDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobDetail::PendingQueue => f.write_str("pending queue"),
            JobDetail::LoadingModel => f.write_str("loading model"),
            JobDetail::Processing => f.write_str("processing"),
            JobDetail::Completed => f.write_str("completed"),
            JobDetail::Failed(FailureCause::HardwareError) => f.write_str("failed (GPU error)"),
            JobDetail::Failed(FailureCause::ManualTrigger) => {
                f.write_str("failed (manual trigger)")
            }
        }
    }
}

/// Fully custom job parameters, as an operator would enter them. Category,
/// parameter count, precision, ops per token and token count must be present
/// when deserialized; the rest default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomJob {
    pub name: Option<String>,
    pub category: JobCategory,
    pub parameters_billion: f64,
    pub precision: String,
    pub base_ops_per_token: f64,
    #[serde(default)]
    pub communication_intensity: f64,
    pub total_tokens: u64,
    pub target_epochs: Option<u32>,
    pub initial_loss: Option<f64>,
    pub loss_reduction_per_epoch: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum JobSpec {
    Catalog {
        key: String,
        total_tokens: Option<u64>,
    },
    Custom(CustomJob),
}

impl JobSpec {
    pub fn catalog(key: impl Into<String>, total_tokens: Option<u64>) -> Self {
        JobSpec::Catalog {
            key: key.into(),
            total_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Catalog key, or the operator-supplied name for custom jobs.
    pub type_label: String,
    pub kind: JobKind,
    pub parameters_billion: f64,
    pub precision: Precision,
    pub base_ops_per_token: f64,
    pub communication_intensity: f64,
    pub total_tokens: u64,
    pub tokens_remaining: f64,
    pub tokens_processed: f64,
    memory_footprint_gb: f64,
    compute_demand_per_token: f64,
    pub status: JobStatus,
    pub detail: JobDetail,
    pub assigned_gpu: Option<AcceleratorId>,
    pub model_load_ticks: u64,
    /// Percent, 0..=100.
    pub model_load_progress: f64,
    pub submission_time: f64,
    pub start_time: Option<f64>,
    pub processing_start_time: Option<f64>,
    pub end_time: Option<f64>,
    /// Set on admission; the owning accelerator skips the job until its next tick.
    pub(crate) admitted_this_tick: bool,
}

impl Job {
    /// Builds a pending job from a submission. Recoverable anomalies (unknown
    /// catalog key, unknown precision, non-positive compute demand) fall back
    /// to defaults; missing or non-positive required fields are rejected.
    pub fn from_spec(id: JobId, spec: &JobSpec, now: f64) -> Result<Job, SimError> {
        match spec {
            JobSpec::Catalog { key, total_tokens } => {
                Self::from_catalog(id, key, *total_tokens, now)
            }
            JobSpec::Custom(custom) => Self::from_custom(id, custom, now),
        }
    }

    fn from_catalog(
        id: JobId,
        key: &str,
        total_tokens: Option<u64>,
        now: f64,
    ) -> Result<Job, SimError> {
        if total_tokens == Some(0) {
            return Err(SimError::InvalidJobSpec(format!(
                "{}: total token count must be positive",
                key
            )));
        }
        let (label, workload) = match catalog::lookup(key) {
            Some(workload) => (key.to_string(), workload),
            None => {
                warn!(
                    "unknown workload type '{}' for {}, using '{}'",
                    key, id, DEFAULT_WORKLOAD
                );
                (DEFAULT_WORKLOAD.to_string(), catalog::default_workload())
            }
        };
        let kind = match workload.training {
            Some(profile) => JobKind::Training(TrainingProgress::new(profile)),
            None => JobKind::Inference,
        };
        Ok(Self::build(
            id,
            label,
            kind,
            workload.parameters_billion,
            workload.precision,
            workload.base_ops_per_token,
            workload.communication_intensity,
            total_tokens.unwrap_or(DEFAULT_TOTAL_TOKENS),
            now,
        ))
    }

    fn from_custom(id: JobId, custom: &CustomJob, now: f64) -> Result<Job, SimError> {
        let invalid = |what: &str| SimError::InvalidJobSpec(format!("{}: {}", id, what));

        if !(custom.parameters_billion.is_finite() && custom.parameters_billion > 0.0) {
            return Err(invalid("parameter count must be positive"));
        }
        if custom.precision.trim().is_empty() {
            return Err(invalid("precision is required"));
        }
        if !(custom.base_ops_per_token.is_finite() && custom.base_ops_per_token > 0.0) {
            return Err(invalid("base ops per token must be positive"));
        }
        if custom.total_tokens == 0 {
            return Err(invalid("total token count must be positive"));
        }
        if !(0.0..=1.0).contains(&custom.communication_intensity) {
            return Err(invalid("communication intensity must be within 0..=1"));
        }

        let kind = match custom.category {
            JobCategory::Inference => JobKind::Inference,
            JobCategory::Training => {
                let target_epochs = custom.target_epochs.unwrap_or(1);
                if target_epochs == 0 {
                    return Err(invalid("target epochs must be positive"));
                }
                JobKind::Training(TrainingProgress::new(TrainingProfile {
                    target_epochs,
                    initial_loss: custom.initial_loss.unwrap_or(0.0),
                    loss_reduction_per_epoch: custom.loss_reduction_per_epoch.unwrap_or(0.0),
                }))
            }
        };

        let precision = custom.precision.parse::<Precision>().unwrap_or_else(|err| {
            warn!("{}: {}, using {}", id, err, Precision::REFERENCE);
            Precision::REFERENCE
        });

        let label = custom
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("custom-{}", id));

        Ok(Self::build(
            id,
            label,
            kind,
            custom.parameters_billion,
            precision,
            custom.base_ops_per_token,
            custom.communication_intensity,
            custom.total_tokens,
            now,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: JobId,
        type_label: String,
        kind: JobKind,
        parameters_billion: f64,
        precision: Precision,
        base_ops_per_token: f64,
        communication_intensity: f64,
        total_tokens: u64,
        now: f64,
    ) -> Job {
        let spec = precision.spec();
        let memory_footprint_gb = parameters_billion * 1e9 * spec.bytes_per_parameter / BYTES_PER_GB;

        let mut compute_demand_per_token =
            base_ops_per_token * parameters_billion * spec.compute_performance_factor;
        if compute_demand_per_token <= 0.0 || compute_demand_per_token.is_nan() {
            warn!(
                "{}: derived compute demand per token is {}, clamping to {}",
                id, compute_demand_per_token, MIN_COMPUTE_DEMAND
            );
            compute_demand_per_token = MIN_COMPUTE_DEMAND;
        }

        Job {
            id,
            type_label,
            kind,
            parameters_billion,
            precision,
            base_ops_per_token,
            communication_intensity,
            total_tokens,
            tokens_remaining: total_tokens as f64,
            tokens_processed: 0.0,
            memory_footprint_gb,
            compute_demand_per_token,
            status: JobStatus::Pending,
            detail: JobDetail::PendingQueue,
            assigned_gpu: None,
            model_load_ticks: 0,
            model_load_progress: 0.0,
            submission_time: now,
            start_time: None,
            processing_start_time: None,
            end_time: None,
            admitted_this_tick: false,
        }
    }

    pub fn category(&self) -> JobCategory {
        match self.kind {
            JobKind::Inference => JobCategory::Inference,
            JobKind::Training(_) => JobCategory::Training,
        }
    }

    pub fn training(&self) -> Option<&TrainingProgress> {
        match &self.kind {
            JobKind::Training(progress) => Some(progress),
            JobKind::Inference => None,
        }
    }

    pub fn memory_footprint_gb(&self) -> f64 {
        self.memory_footprint_gb
    }

    pub fn compute_demand_per_token(&self) -> f64 {
        self.compute_demand_per_token
    }

    /// Per-token demand after the interconnect penalty realistic mode applies.
    pub fn effective_demand_per_token(&self, mode: PerformanceMode, bottleneck_factor: f64) -> f64 {
        let demand = self.compute_demand_per_token;
        if mode == PerformanceMode::Realistic && self.communication_intensity > 0.0 {
            demand * (1.0 + self.communication_intensity * bottleneck_factor)
        } else {
            demand
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Actively consuming tokens this tick.
    pub fn is_processing(&self) -> bool {
        !self.admitted_this_tick
            && self.detail == JobDetail::Processing
            && self.tokens_remaining > 0.0
    }

    pub(crate) fn start(&mut self, gpu: AcceleratorId, load_bandwidth_gb_per_tick: f64, now: f64) {
        self.status = JobStatus::Running;
        self.assigned_gpu = Some(gpu);
        self.start_time = Some(now);
        self.admitted_this_tick = true;
        if self.memory_footprint_gb > 0.0 && load_bandwidth_gb_per_tick > 0.0 {
            self.model_load_ticks =
                (self.memory_footprint_gb / load_bandwidth_gb_per_tick).ceil() as u64;
            self.model_load_progress = 0.0;
            self.detail = JobDetail::LoadingModel;
        } else {
            self.model_load_ticks = 0;
            self.model_load_progress = 100.0;
            self.detail = JobDetail::Processing;
            self.processing_start_time = Some(now);
        }
    }

    /// Returns true when loading finished on this call.
    pub(crate) fn advance_load(&mut self, time_scale: f64, now: f64) -> bool {
        if self.detail != JobDetail::LoadingModel {
            return false;
        }
        let ticks = self.model_load_ticks.max(1) as f64;
        self.model_load_progress += (1.0 / ticks) * 100.0 * time_scale;
        if self.model_load_progress >= 100.0 {
            self.model_load_progress = 100.0;
            self.detail = JobDetail::Processing;
            self.processing_start_time = Some(now);
            return true;
        }
        false
    }

    /// Consumes `tokens` of remaining work. Returns the new epoch when a
    /// training job crossed an epoch boundary.
    pub(crate) fn consume(&mut self, tokens: f64) -> Option<u32> {
        self.tokens_remaining -= tokens;
        if self.tokens_remaining <= 0.0 {
            // Per-tick shares are fractional; pin the finished job to its exact total.
            self.tokens_remaining = 0.0;
            self.tokens_processed = self.total_tokens as f64;
        } else {
            self.tokens_processed += tokens;
        }
        let (processed, total) = (self.tokens_processed, self.total_tokens);
        match &mut self.kind {
            JobKind::Training(progress) => progress.advance(processed, total),
            JobKind::Inference => None,
        }
    }

    pub(crate) fn mark_completed(&mut self, now: f64) {
        self.status = JobStatus::Completed;
        self.detail = JobDetail::Completed;
        self.end_time = Some(now);
    }

    pub(crate) fn mark_failed(&mut self, cause: FailureCause, now: f64) {
        self.status = JobStatus::Failed;
        self.detail = JobDetail::Failed(cause);
        self.end_time = Some(now);
    }

    pub fn duration(&self) -> Option<f64> {
        Some(self.end_time? - self.start_time?)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let training = self.training();
        JobSnapshot {
            id: self.id,
            type_label: self.type_label.clone(),
            category: self.category(),
            parameters_billion: self.parameters_billion,
            precision: self.precision,
            status: self.status,
            detail: self.detail.to_string(),
            memory_footprint_gb: self.memory_footprint_gb,
            total_tokens: self.total_tokens,
            tokens_remaining: self.tokens_remaining,
            tokens_processed: self.tokens_processed,
            model_load_progress: self.model_load_progress,
            assigned_gpu: self.assigned_gpu,
            current_epoch: training.map(|t| t.current_epoch),
            target_epochs: training.map(|t| t.profile.target_epochs),
            current_loss: training.map(|t| t.current_loss),
            submission_time: self.submission_time,
            start_time: self.start_time,
            end_time: self.end_time,
            duration: self.duration(),
        }
    }
}

/// Owned, read-only view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    #[serde(rename = "type")]
    pub type_label: String,
    pub category: JobCategory,
    pub parameters_billion: f64,
    pub precision: Precision,
    pub status: JobStatus,
    pub detail: String,
    pub memory_footprint_gb: f64,
    pub total_tokens: u64,
    pub tokens_remaining: f64,
    pub tokens_processed: f64,
    pub model_load_progress: f64,
    pub assigned_gpu: Option<AcceleratorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_epoch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_epochs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_loss: Option<f64>,
    pub submission_time: f64,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub duration: Option<f64>,
}
