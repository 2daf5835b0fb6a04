//! Structured observability hooks for the pipeline lifecycle.
//!
//! Each emitter logs one `tracing` event with a stable `event` field so log
//! pipelines can key on it. Verbosity follows `RUST_LOG`; JSON output is
//! selected through [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::orchestrator::{JobHandle, PipelineStatus};

/// Emit event: pipeline started.
pub fn emit_pipeline_started(plan_digest: &str, git_ref: &str, layers: usize, modules: usize) {
    info!(
        event = "pipeline.started",
        plan_digest = %plan_digest,
        git_ref = %git_ref,
        layers = layers,
        modules = modules,
    );
}

pub fn emit_layer_started(layer_index: usize, modules: usize) {
    info!(event = "layer.started", layer_index = layer_index, modules = modules);
}

pub fn emit_job_triggered(moniker: &str, run_id: &str) {
    info!(event = "job.triggered", moniker = %moniker, run_id = %run_id);
}

/// Emit event: a job reached a terminal state. Errors log at warn level.
pub fn emit_job_resolved(job: &JobHandle) {
    match &job.error {
        Some(error) => warn!(
            event = "job.resolved",
            moniker = %job.moniker,
            run_id = job.run_id.as_deref().unwrap_or("-"),
            status = ?job.status,
            error = %error,
        ),
        None => info!(
            event = "job.resolved",
            moniker = %job.moniker,
            run_id = job.run_id.as_deref().unwrap_or("-"),
            status = ?job.status,
        ),
    }
}

pub fn emit_layer_failed(layer_index: usize, monikers: &[String]) {
    warn!(event = "layer.failed", layer_index = layer_index, failed = ?monikers);
}

/// Emit event: cancellation observed before `layer_index` started.
pub fn emit_pipeline_cancelled(layer_index: usize, skipped_modules: usize) {
    warn!(
        event = "pipeline.cancelled",
        layer_index = layer_index,
        skipped_modules = skipped_modules,
    );
}

pub fn emit_pipeline_finished(plan_digest: &str, status: PipelineStatus, duration_ms: u64) {
    info!(
        event = "pipeline.finished",
        plan_digest = %plan_digest,
        status = ?status,
        duration_ms = duration_ms,
    );
}
