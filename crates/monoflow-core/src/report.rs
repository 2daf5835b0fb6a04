//! Plain-text plan and pipeline reports, plus the JSON result artifact.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::orchestrator::{JobHandle, JobStatus, PipelineResult};
use crate::planner::ExecutionPlan;

/// Render a plan as one line per layer.
pub fn render_plan(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Execution plan {} ({} layers, {} modules)",
        short_digest(&plan.digest()),
        plan.len(),
        plan.module_count()
    );
    if plan.is_empty() {
        out.push_str("  (nothing to run)\n");
    }
    for (idx, layer) in plan.layers().iter().enumerate() {
        let monikers: Vec<&str> = layer.iter().map(String::as_str).collect();
        let _ = writeln!(out, "  layer {}: {}", idx, monikers.join(", "));
    }
    out
}

/// Render a per-layer, per-module report of a pipeline run.
pub fn render_pipeline(result: &PipelineResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Pipeline {} at {} ({}ms, plan {})",
        if result.is_success() { "PASSED" } else { "FAILED" },
        result.git_ref,
        result.duration_ms,
        short_digest(&result.plan_digest)
    );

    let mut current_layer = None;
    for job in &result.jobs {
        if current_layer != Some(job.layer_index) {
            let _ = writeln!(out, "layer {}", job.layer_index);
            current_layer = Some(job.layer_index);
        }
        out.push_str(&render_job(job));
    }

    if let Some(failed) = &result.failed_at {
        let _ = writeln!(
            out,
            "Stopped after layer {}; failing modules: {}",
            failed.layer_index,
            failed.monikers.join(", ")
        );
    }

    if let Some(layer_index) = result.cancelled_before {
        let _ = writeln!(out, "Cancelled before layer {}", layer_index);
    }

    let _ = writeln!(
        out,
        "Summary: {} succeeded, {} failed, {} errored",
        result.count(JobStatus::Succeeded),
        result.count(JobStatus::Failed),
        result.count(JobStatus::Errored)
    );
    out
}

fn render_job(job: &JobHandle) -> String {
    let (mark, label) = match job.status {
        JobStatus::Succeeded => ("✓", "succeeded"),
        JobStatus::Failed => ("✗", "failed"),
        JobStatus::Errored => ("!", "errored"),
        JobStatus::Running => ("…", "running"),
        JobStatus::Pending => ("·", "pending"),
    };
    let mut line = format!("  {} {} {}", mark, job.moniker, label);
    if let Some(run_id) = &job.run_id {
        let _ = write!(line, " [{}]", run_id);
    }
    if let Some(detail) = &job.failure_detail {
        let _ = write!(line, ": {}", detail);
    }
    if let Some(error) = &job.error {
        let _ = write!(line, ": {}", error);
    }
    line.push('\n');
    line
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Write the pipeline result as pretty JSON.
pub fn write_result_json(path: &Path, result: &PipelineResult) -> Result<()> {
    let content = serde_json::to_string_pretty(result).context("serialize pipeline result")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::orchestrator::{FailedLayer, PipelineStatus};

    fn plan() -> ExecutionPlan {
        ExecutionPlan::new(vec![
            ["lib-a", "lib-b"].iter().map(|s| s.to_string()).collect(),
            ["app"].iter().map(|s| s.to_string()).collect(),
        ])
    }

    fn job(moniker: &str, layer: usize, status: JobStatus) -> JobHandle {
        let mut job = JobHandle::new(moniker, layer);
        job.status = status;
        job.run_id = Some(format!("run-{moniker}"));
        job
    }

    #[test]
    fn plan_render_lists_layers_in_order() {
        let rendered = render_plan(&plan());
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].contains("2 layers, 3 modules"));
        assert_eq!(lines[1], "  layer 0: lib-a, lib-b");
        assert_eq!(lines[2], "  layer 1: app");
    }

    #[test]
    fn empty_plan_render_says_so() {
        let rendered = render_plan(&ExecutionPlan::default());
        assert!(rendered.contains("nothing to run"));
    }

    #[test]
    fn pipeline_render_distinguishes_failure_kinds() {
        let mut failed = job("lib-a", 0, JobStatus::Failed);
        failed.failure_detail = Some("exit code 101".to_string());
        let mut errored = job("lib-b", 0, JobStatus::Errored);
        errored.error = Some(ExecutionError::WatchFailed {
            detail: "connection reset".to_string(),
        });

        let result = PipelineResult {
            status: PipelineStatus::Failure,
            git_ref: "abc123".to_string(),
            plan_digest: plan().digest(),
            jobs: vec![failed, errored],
            failed_at: Some(FailedLayer {
                layer_index: 0,
                monikers: vec!["lib-a".to_string(), "lib-b".to_string()],
            }),
            cancelled_before: None,
            duration_ms: 42,
        };

        let rendered = render_pipeline(&result);
        assert!(rendered.starts_with("Pipeline FAILED at abc123"));
        assert!(rendered.contains("✗ lib-a failed [run-lib-a]: exit code 101"));
        assert!(rendered.contains("! lib-b errored [run-lib-b]: watch failed: connection reset"));
        assert!(rendered.contains("Stopped after layer 0; failing modules: lib-a, lib-b"));
        assert!(rendered.contains("Summary: 0 succeeded, 1 failed, 1 errored"));
        assert!(!rendered.contains("layer 1"));
    }

    #[test]
    fn pipeline_render_notes_cancellation() {
        let result = PipelineResult {
            status: PipelineStatus::Failure,
            git_ref: "abc123".to_string(),
            plan_digest: plan().digest(),
            jobs: vec![job("lib-a", 0, JobStatus::Succeeded)],
            failed_at: None,
            cancelled_before: Some(1),
            duration_ms: 5,
        };
        let rendered = render_pipeline(&result);
        assert!(rendered.starts_with("Pipeline FAILED"));
        assert!(rendered.contains("Cancelled before layer 1"));
        assert!(!rendered.contains("Stopped after layer"));
    }

    #[test]
    fn result_json_is_written() {
        let result = PipelineResult {
            status: PipelineStatus::Success,
            git_ref: "main".to_string(),
            plan_digest: plan().digest(),
            jobs: vec![job("app", 0, JobStatus::Succeeded)],
            failed_at: None,
            cancelled_before: None,
            duration_ms: 1,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        write_result_json(&path, &result).unwrap();

        let back: PipelineResult =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, result);
    }
}
