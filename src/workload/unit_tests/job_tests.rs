use crate::rack::accelerator::AcceleratorId;
use crate::sim::config::PerformanceMode;
use crate::sim::error::SimError;
use crate::workload::job::{
    CustomJob, FailureCause, Job, JobCategory, JobDetail, JobId, JobSpec, JobStatus,
    DEFAULT_TOTAL_TOKENS, MIN_COMPUTE_DEMAND,
};
use crate::workload::precision::Precision;

fn custom(parameters_billion: f64, precision: &str, total_tokens: u64) -> CustomJob {
    CustomJob {
        name: None,
        category: JobCategory::Inference,
        parameters_billion,
        precision: precision.to_string(),
        base_ops_per_token: 1.0,
        communication_intensity: 0.0,
        total_tokens,
        ..CustomJob::default()
    }
}

fn training_job(target_epochs: u32, total_tokens: u64) -> Job {
    let spec = JobSpec::Custom(CustomJob {
        category: JobCategory::Training,
        target_epochs: Some(target_epochs),
        initial_loss: Some(2.0),
        loss_reduction_per_epoch: Some(0.5),
        ..custom(1.0, "FP16", total_tokens)
    });
    Job::from_spec(JobId(0), &spec, 0.0).unwrap()
}

#[test]
fn catalog_job_derives_footprint_and_demand() {
    let job = Job::from_spec(JobId(1), &JobSpec::catalog("default", None), 2.5).unwrap();
    assert_eq!(job.type_label, "default");
    assert_eq!(job.category(), JobCategory::Inference);
    assert_eq!(job.total_tokens, DEFAULT_TOTAL_TOKENS);
    assert_eq!(job.tokens_remaining, DEFAULT_TOTAL_TOKENS as f64);
    assert_eq!(job.submission_time, 2.5);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.detail, JobDetail::PendingQueue);
    // 7e9 params * 2 bytes, in GiB
    assert!((job.memory_footprint_gb() - 13.0385).abs() < 1e-3);
    assert!((job.compute_demand_per_token() - 12.6).abs() < 1e-9);
}

#[test]
fn unknown_catalog_key_falls_back_to_default() {
    let job = Job::from_spec(JobId(0), &JobSpec::catalog("nope", Some(64)), 0.0).unwrap();
    assert_eq!(job.type_label, "default");
    assert_eq!(job.parameters_billion, 7.0);
    assert_eq!(job.total_tokens, 64);
}

#[test]
fn zero_token_submission_is_rejected() {
    let err = Job::from_spec(JobId(0), &JobSpec::catalog("default", Some(0)), 0.0).unwrap_err();
    assert!(matches!(err, SimError::InvalidJobSpec(_)));

    let err = Job::from_spec(JobId(0), &JobSpec::Custom(custom(1.0, "FP16", 0)), 0.0).unwrap_err();
    assert!(matches!(err, SimError::InvalidJobSpec(_)));
}

#[test]
fn custom_job_requires_positive_fields() {
    let reject = |job: CustomJob| {
        matches!(
            Job::from_spec(JobId(0), &JobSpec::Custom(job), 0.0),
            Err(SimError::InvalidJobSpec(_))
        )
    };
    assert!(reject(custom(0.0, "FP16", 10)));
    assert!(reject(custom(-3.0, "FP16", 10)));
    assert!(reject(custom(1.0, "  ", 10)));
    assert!(reject(CustomJob {
        base_ops_per_token: 0.0,
        ..custom(1.0, "FP16", 10)
    }));
    assert!(reject(CustomJob {
        communication_intensity: 1.5,
        ..custom(1.0, "FP16", 10)
    }));
    assert!(reject(CustomJob {
        category: JobCategory::Training,
        target_epochs: Some(0),
        ..custom(1.0, "FP16", 10)
    }));
    assert!(!reject(custom(1.0, "FP16", 10)));
}

#[test]
fn custom_job_unknown_precision_uses_reference() {
    let job = Job::from_spec(JobId(3), &JobSpec::Custom(custom(1.0, "FP8", 10)), 0.0).unwrap();
    assert_eq!(job.precision, Precision::REFERENCE);
    assert_eq!(job.type_label, "custom-job-3");

    let named = CustomJob {
        name: Some("bench".to_string()),
        ..custom(1.0, "int8", 10)
    };
    let job = Job::from_spec(JobId(4), &JobSpec::Custom(named), 0.0).unwrap();
    assert_eq!(job.precision, Precision::INT8);
    assert_eq!(job.type_label, "bench");
}

#[test]
fn tiny_compute_demand_is_clamped() {
    let job = Job::from_spec(
        JobId(0),
        &JobSpec::Custom(CustomJob {
            base_ops_per_token: 1e-300,
            ..custom(1e-300, "INT4", 10)
        }),
        0.0,
    )
    .unwrap();
    assert_eq!(job.compute_demand_per_token(), MIN_COMPUTE_DEMAND);
}

#[test]
fn realistic_mode_inflates_communication_heavy_jobs() {
    let job = Job::from_spec(
        JobId(0),
        &JobSpec::Custom(CustomJob {
            communication_intensity: 0.5,
            ..custom(10.0, "FP32", 10)
        }),
        0.0,
    )
    .unwrap();
    assert_eq!(job.effective_demand_per_token(PerformanceMode::Theoretical, 0.2), 10.0);
    assert!((job.effective_demand_per_token(PerformanceMode::Realistic, 0.2) - 11.0).abs() < 1e-9);
}

#[test]
fn start_schedules_model_load_from_bandwidth() {
    let mut job = Job::from_spec(JobId(0), &JobSpec::Custom(custom(1.0, "FP16", 10)), 0.0).unwrap();
    job.start(AcceleratorId(2), 0.2, 1.0);
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.detail, JobDetail::LoadingModel);
    assert_eq!(job.assigned_gpu, Some(AcceleratorId(2)));
    assert_eq!(job.start_time, Some(1.0));
    // 1.86 GB at 0.2 GB per tick
    assert_eq!(job.model_load_ticks, 10);
    assert!(!job.is_processing());

    for step in 1..10 {
        assert!(!job.advance_load(1.0, step as f64));
    }
    assert_eq!(job.detail, JobDetail::LoadingModel);
    assert!(job.advance_load(1.0, 10.0));
    assert_eq!(job.detail, JobDetail::Processing);
    assert_eq!(job.model_load_progress, 100.0);
    assert_eq!(job.processing_start_time, Some(10.0));
}

#[test]
fn start_without_bandwidth_processes_immediately() {
    let mut job = Job::from_spec(JobId(0), &JobSpec::Custom(custom(1.0, "FP16", 10)), 0.0).unwrap();
    job.start(AcceleratorId(0), 0.0, 0.5);
    assert_eq!(job.detail, JobDetail::Processing);
    assert_eq!(job.model_load_progress, 100.0);
    assert_eq!(job.processing_start_time, Some(0.5));
    // fresh admissions wait for the next tick
    assert!(!job.is_processing());
    job.admitted_this_tick = false;
    assert!(job.is_processing());
}

#[test]
fn consume_conserves_tokens() {
    let mut job = Job::from_spec(JobId(0), &JobSpec::Custom(custom(1.0, "FP16", 100)), 0.0).unwrap();
    assert_eq!(job.consume(30.0), None);
    assert_eq!(job.consume(45.5), None);
    assert!((job.tokens_processed + job.tokens_remaining - 100.0).abs() < 1e-9);
    job.consume(24.5);
    assert_eq!(job.tokens_remaining, 0.0);
}

#[test]
fn training_epochs_follow_cumulative_progress() {
    let mut job = training_job(4, 400);
    assert_eq!(job.training().unwrap().current_epoch, 0);
    assert_eq!(job.training().unwrap().current_loss, 2.0);

    assert_eq!(job.consume(99.0), None);
    assert_eq!(job.consume(1.0), Some(1));
    assert_eq!(job.training().unwrap().current_loss, 1.5);

    // several epochs in one step
    assert_eq!(job.consume(250.0), Some(3));
    assert_eq!(job.training().unwrap().current_loss, 0.5);

    assert_eq!(job.consume(50.0), Some(4));
    assert_eq!(job.training().unwrap().current_epoch, 4);
    assert_eq!(job.training().unwrap().current_loss, 0.0);
}

#[test]
fn finished_training_job_reaches_target_epoch() {
    // a single full step over an epoch count that does not divide the total
    let mut job = training_job(7, 5000);
    assert_eq!(job.consume(5000.0), Some(7));
    assert_eq!(job.tokens_processed, 5000.0);

    // fractional per-tick shares, as a 6.3 demand/token job gets from a 100 budget
    for (epochs, total) in [(3, 7777), (3, 5000), (5, 5000), (7, 7777)] {
        let mut job = training_job(epochs, total);
        let share = 100.0 / 6.3;
        while job.tokens_remaining > 0.0 {
            let tokens = job.tokens_remaining.min(share);
            job.consume(tokens);
        }
        assert_eq!(job.tokens_processed, total as f64);
        let training = job.training().unwrap();
        assert_eq!(training.current_epoch, epochs, "{epochs} epochs over {total} tokens");
        let expected_loss = (2.0 - 0.5 * epochs as f64).max(0.0);
        assert_eq!(training.current_loss, expected_loss);
    }
}

#[test]
fn training_loss_never_goes_negative() {
    let mut job = training_job(10, 100);
    job.consume(100.0);
    let training = job.training().unwrap();
    assert_eq!(training.current_epoch, 10);
    assert_eq!(training.current_loss, 0.0);
}

#[test]
fn terminal_states_record_end_time() {
    let mut job = Job::from_spec(JobId(7), &JobSpec::Custom(custom(1.0, "FP16", 10)), 0.0).unwrap();
    job.start(AcceleratorId(0), 0.0, 1.0);
    job.mark_failed(FailureCause::ManualTrigger, 3.5);
    assert!(job.is_finished());
    assert_eq!(job.duration(), Some(2.5));
    assert_eq!(job.detail.to_string(), "failed (manual trigger)");

    let snapshot = job.snapshot();
    assert_eq!(snapshot.id, JobId(7));
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.detail, "failed (manual trigger)");
    assert_eq!(snapshot.current_epoch, None);
}

#[test]
fn snapshot_serializes_ids_as_strings() {
    let mut job = training_job(2, 10);
    job.start(AcceleratorId(5), 0.0, 0.0);
    let value = serde_json::to_value(job.snapshot()).unwrap();
    assert_eq!(value["id"], "job-0");
    assert_eq!(value["assigned_gpu"], "gpu-5");
    assert_eq!(value["type"], "custom-job-0");
    assert_eq!(value["category"], "training");
    assert_eq!(value["target_epochs"], 2);
}
