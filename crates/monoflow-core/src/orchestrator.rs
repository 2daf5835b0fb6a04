//! Layer-by-layer execution of a plan against a job backend.
//!
//! [`Orchestrator::run`] triggers every module of a layer, waits for all of
//! them, and only then moves on. The first layer with a failed or errored
//! module ends the pipeline: its in-flight jobs are still drained, but no
//! later layer is triggered.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::cancel::CancelSignal;
use crate::config::OrchestratorConfig;
use crate::error::{BackendError, ExecutionError};
use crate::obs;
use crate::planner::ExecutionPlan;

/// How a job that ran to completion ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    /// The job ran and reported failure.
    Failed { detail: String },
}

/// External system able to start and report on a module's unit of work.
///
/// Inject a real implementation that talks to a CI system, or
/// [`crate::fakes::ScriptedBackend`] in tests.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Start the job for `moniker` at `git_ref`, returning its run id.
    async fn trigger(&self, moniker: &str, git_ref: &str) -> Result<String, BackendError>;

    /// Block until the run reaches a terminal state.
    ///
    /// `Err` means the outcome could not be determined, not that the job
    /// failed.
    async fn watch(&self, run_id: &str) -> Result<JobOutcome, BackendError>;
}

/// Lifecycle state of a single module's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Errored,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Errored
        )
    }

    /// Failed or Errored: both fail the layer.
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Errored)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Errored)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Errored)
        )
    }
}

/// Tracks one module's job from trigger to terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub moniker: String,
    pub layer_index: usize,
    /// Set once the trigger succeeds.
    pub run_id: Option<String>,
    pub status: JobStatus,
    /// Failure detail reported by the job itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
    /// Why the orchestrator could not get an outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    pub fn new(moniker: impl Into<String>, layer_index: usize) -> Self {
        Self {
            moniker: moniker.into(),
            layer_index,
            run_id: None,
            status: JobStatus::Pending,
            failure_detail: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: JobStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal job transition {:?} -> {:?} for {}",
            self.status,
            next,
            self.moniker
        );
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    fn mark_running(&mut self, run_id: String) {
        self.run_id = Some(run_id);
        self.started_at = Some(Utc::now());
        self.transition(JobStatus::Running);
    }

    fn resolve(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded => self.transition(JobStatus::Succeeded),
            JobOutcome::Failed { detail } => {
                self.failure_detail = Some(detail);
                self.transition(JobStatus::Failed);
            }
        }
    }

    fn mark_errored(&mut self, error: ExecutionError) {
        self.error = Some(error);
        self.transition(JobStatus::Errored);
    }

    /// Wall-clock time between trigger and resolution.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failure,
}

/// The first layer that failed and the modules that failed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLayer {
    pub layer_index: usize,
    pub monikers: Vec<String>,
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub git_ref: String,
    pub plan_digest: String,
    /// Every attempted job, in layer order then moniker order. Modules of
    /// layers that never started are not listed.
    pub jobs: Vec<JobHandle>,
    pub failed_at: Option<FailedLayer>,
    /// First layer left untriggered because cancellation was requested
    /// before it started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_before: Option<usize>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// Process exit code: 0 on success, 1 on failure.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            PipelineStatus::Success => 0,
            PipelineStatus::Failure => 1,
        }
    }

    pub fn job(&self, moniker: &str) -> Option<&JobHandle> {
        self.jobs.iter().find(|j| j.moniker == moniker)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

/// Drives an [`ExecutionPlan`] against a [`JobBackend`].
pub struct Orchestrator {
    backend: Arc<dyn JobBackend>,
    config: OrchestratorConfig,
    cancel: CancelSignal,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            config: OrchestratorConfig::default(),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute `plan` layer by layer at `git_ref`.
    ///
    /// Never returns an error: trigger, watch, timeout, and cancellation
    /// problems are recorded on the affected [`JobHandle`] and fail the
    /// pipeline at that layer.
    #[instrument(skip(self, plan), fields(layers = plan.len()))]
    pub async fn run(&self, plan: &ExecutionPlan, git_ref: &str) -> PipelineResult {
        let start = Instant::now();
        let plan_digest = plan.digest();
        obs::emit_pipeline_started(&plan_digest, git_ref, plan.len(), plan.module_count());

        let mut jobs = Vec::with_capacity(plan.module_count());
        let mut failed_at = None;
        let mut cancelled_before = None;

        for (layer_index, layer) in plan.layers().iter().enumerate() {
            if self.cancel.is_cancelled() {
                obs::emit_pipeline_cancelled(layer_index, layer.len());
                cancelled_before = Some(layer_index);
                break;
            }
            obs::emit_layer_started(layer_index, layer.len());
            let handles = self.run_layer(layer_index, layer, git_ref).await;

            let failing: Vec<String> = handles
                .iter()
                .filter(|h| h.status.is_failure())
                .map(|h| h.moniker.clone())
                .collect();
            jobs.extend(handles);

            if !failing.is_empty() {
                obs::emit_layer_failed(layer_index, &failing);
                failed_at = Some(FailedLayer {
                    layer_index,
                    monikers: failing,
                });
                break;
            }
        }

        let status = if failed_at.is_some() || cancelled_before.is_some() {
            PipelineStatus::Failure
        } else {
            PipelineStatus::Success
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_pipeline_finished(&plan_digest, status, duration_ms);

        PipelineResult {
            status,
            git_ref: git_ref.to_string(),
            plan_digest,
            jobs,
            failed_at,
            cancelled_before,
            duration_ms,
        }
    }

    /// Trigger every module of the layer, then await every triggered job.
    async fn run_layer(
        &self,
        layer_index: usize,
        layer: &BTreeSet<String>,
        git_ref: &str,
    ) -> Vec<JobHandle> {
        let mut handles: Vec<JobHandle> = layer
            .iter()
            .map(|m| JobHandle::new(m.as_str(), layer_index))
            .collect();

        // Triggers are independent round-trips; issue them together.
        let triggered = join_all(
            handles
                .iter()
                .map(|h| self.backend.trigger(&h.moniker, git_ref)),
        )
        .await;

        let permits = self
            .config
            .max_concurrent_watches
            .clamp(1, Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut watches = JoinSet::new();

        for (idx, (handle, result)) in handles.iter_mut().zip(triggered).enumerate() {
            match result {
                Ok(run_id) => {
                    obs::emit_job_triggered(&handle.moniker, &run_id);
                    handle.mark_running(run_id.clone());

                    let backend = Arc::clone(&self.backend);
                    let semaphore = Arc::clone(&semaphore);
                    let mut cancel = self.cancel.clone();
                    let timeout = self.config.watch_timeout;
                    watches.spawn(async move {
                        let outcome = AssertUnwindSafe(await_job(
                            backend.as_ref(),
                            &run_id,
                            timeout,
                            semaphore,
                            &mut cancel,
                        ))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(ExecutionError::WatchTaskPanicked {
                                detail: panic_message(panic.as_ref()),
                            })
                        });
                        (idx, outcome)
                    });
                }
                Err(e) => {
                    warn!(moniker = %handle.moniker, error = %e, "trigger failed");
                    handle.mark_errored(ExecutionError::TriggerFailed {
                        detail: e.to_string(),
                    });
                    obs::emit_job_resolved(handle);
                }
            }
        }

        // Barrier: the layer is done only when every watch has resolved.
        while let Some(joined) = watches.join_next().await {
            match joined {
                Ok((idx, outcome)) => {
                    let handle = &mut handles[idx];
                    match outcome {
                        Ok(outcome) => handle.resolve(outcome),
                        Err(error) => handle.mark_errored(error),
                    }
                    obs::emit_job_resolved(handle);
                }
                Err(e) => warn!(layer_index, error = %e, "watch task did not complete"),
            }
        }

        for handle in handles.iter_mut().filter(|h| h.status == JobStatus::Running) {
            handle.mark_errored(ExecutionError::WatchTaskPanicked {
                detail: "watch task ended without reporting an outcome".to_string(),
            });
            obs::emit_job_resolved(handle);
        }

        handles
    }
}

/// Wait for one job, honouring the watch timeout and cancellation.
async fn await_job(
    backend: &dyn JobBackend,
    run_id: &str,
    timeout: Option<Duration>,
    semaphore: Arc<Semaphore>,
    cancel: &mut CancelSignal,
) -> Result<JobOutcome, ExecutionError> {
    let watch = async move {
        let _permit = semaphore.acquire_owned().await.ok();
        let watched = match timeout {
            Some(limit) => match tokio::time::timeout(limit, backend.watch(run_id)).await {
                Ok(watched) => watched,
                Err(_) => {
                    return Err(ExecutionError::WatchTimedOut {
                        after_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => backend.watch(run_id).await,
        };
        watched.map_err(|e| ExecutionError::WatchFailed {
            detail: e.to_string(),
        })
    };

    tokio::select! {
        result = watch => result,
        _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
