//! Integration tests: manifest → plan → orchestrator → real subprocesses.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use monoflow_ci::ProcessJobBackend;
use monoflow_core::{
    cancel_pair, filter_by_units, plan, ContractSource, DependencyGraph, ExecutionError,
    JobStatus, ManifestSource, Orchestrator, PipelineStatus,
};

/// Write a manifest for the chain `app → api → core` plus a unit-less
/// `docs` module. Every unit appends its moniker to `run.log`.
fn write_chain_manifest(root: &Path, core_script: &str) -> std::path::PathBuf {
    for dir in ["libs/core", "services/api", "apps/app"] {
        std::fs::create_dir_all(root.join(dir)).unwrap();
    }
    let log = root.join("run.log");
    let manifest = format!(
        r#"
[[module]]
moniker = "core"
path = "libs/core"

[module.unit]
command = ["sh", "-c", '{core_script}; echo "$MONOFLOW_MODULE" >> "$LOG"']
env = {{ LOG = "{log}" }}

[[module]]
moniker = "docs"
dependencies = ["core"]

[[module]]
moniker = "api"
path = "services/api"
dependencies = ["docs"]

[module.unit]
command = ["sh", "-c", 'echo "$MONOFLOW_MODULE" >> "$LOG"']
env = {{ LOG = "{log}" }}

[[module]]
moniker = "app"
path = "apps/app"
dependencies = ["api"]

[module.unit]
command = ["sh", "-c", 'echo "$MONOFLOW_MODULE@$MONOFLOW_REF" >> "$LOG"']
env = {{ LOG = "{log}" }}
"#,
        log = log.display(),
    );
    let path = root.join("monoflow.toml");
    std::fs::write(&path, manifest).unwrap();
    path
}

fn read_log(root: &Path) -> Vec<String> {
    std::fs::read_to_string(root.join("run.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn load_graph(manifest: &Path) -> DependencyGraph {
    let modules = ManifestSource::new(manifest).load().expect("manifest loads");
    DependencyGraph::build(modules).expect("graph builds")
}

/// Test: units run in dependency order, one layer at a time
#[tokio::test]
async fn test_chain_runs_in_dependency_order() {
    let root = tempfile::tempdir().unwrap();
    let manifest = write_chain_manifest(root.path(), "sleep 0.2");
    let graph = load_graph(&manifest);

    let plan = filter_by_units(&plan(&graph, ["app"]).unwrap(), &graph);
    assert_eq!(plan.len(), 3, "docs has no unit and is filtered out");

    let backend = Arc::new(ProcessJobBackend::from_graph(&graph, root.path()));
    let result = Orchestrator::new(backend).run(&plan, "abc123").await;

    assert_eq!(result.status, PipelineStatus::Success, "{result:?}");
    assert_eq!(result.jobs.len(), 3);
    assert_eq!(read_log(root.path()), vec!["core", "api", "app@abc123"]);
}

/// Test: a failing unit stops every later layer
#[tokio::test]
async fn test_failing_unit_stops_pipeline() {
    let root = tempfile::tempdir().unwrap();
    let manifest = write_chain_manifest(root.path(), "echo compile error >&2; exit 2");
    let graph = load_graph(&manifest);
    let plan = filter_by_units(&plan(&graph, ["app"]).unwrap(), &graph);

    let backend = Arc::new(ProcessJobBackend::from_graph(&graph, root.path()));
    let result = Orchestrator::new(backend).run(&plan, "abc123").await;

    assert_eq!(result.status, PipelineStatus::Failure);
    assert_eq!(result.exit_code(), 1);
    let core = result.job("core").expect("core handle");
    assert_eq!(core.status, JobStatus::Failed);
    assert_eq!(
        core.failure_detail.as_deref(),
        Some("exit code 2: compile error")
    );
    assert!(result.job("api").is_none());
    assert!(read_log(root.path()).is_empty(), "nothing after core may run");
}

/// Test: cancelling a run kills in-flight units promptly
#[tokio::test]
async fn test_cancel_kills_running_unit() {
    let root = tempfile::tempdir().unwrap();
    let manifest = write_chain_manifest(root.path(), "sleep 30");
    let graph = load_graph(&manifest);
    let plan = filter_by_units(&plan(&graph, ["app"]).unwrap(), &graph);

    let backend = Arc::new(ProcessJobBackend::from_graph(&graph, root.path()));
    let (handle, signal) = cancel_pair();
    let orchestrator = Orchestrator::new(backend.clone()).with_cancel_signal(signal);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();
    });

    let start = Instant::now();
    let result = orchestrator.run(&plan, "abc123").await;
    assert!(start.elapsed() < Duration::from_secs(10));

    assert_eq!(result.status, PipelineStatus::Failure);
    let core = result.job("core").unwrap();
    assert_eq!(core.status, JobStatus::Errored);
    assert_eq!(core.error, Some(ExecutionError::Cancelled));
    assert_eq!(backend.in_flight(), 0);
    assert!(read_log(root.path()).is_empty());
}
