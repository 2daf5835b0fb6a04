//! monoflow core library
//!
//! Plans and drives layered execution of monorepo modules:
//! - [`graph::DependencyGraph`]: validated module dependency DAG
//! - [`planner::compute_layers`]: maximal-parallelism Kahn layering
//! - [`filter::filter_plan`]: drops unit-less modules without losing order
//! - [`orchestrator::Orchestrator`]: fail-fast, layer-by-layer job execution
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use monoflow_core::{filter_by_units, plan, DependencyGraph, ManifestSource, Orchestrator};
//!
//! let modules = ManifestSource::new("monoflow.toml").load()?;
//! let graph = DependencyGraph::build(modules)?;
//! let plan = filter_by_units(&plan(&graph, ["app"])?, &graph);
//! let result = Orchestrator::new(backend).run(&plan, "HEAD").await;
//! std::process::exit(result.exit_code());
//! ```

pub mod cancel;
pub mod changes;
pub mod config;
pub mod contract;
pub mod error;
pub mod fakes;
pub mod filter;
pub mod git;
pub mod graph;
pub mod obs;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod telemetry;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use changes::{ChangeDetector, PathChangeDetector};
pub use config::OrchestratorConfig;
pub use contract::{ContractSource, ManifestSource, Module, StaticSource, UnitSpec};
pub use error::{BackendError, ContractError, ExecutionError, PlanningError, PlanningResult};
pub use filter::{filter_by_units, filter_plan};
pub use git::{capture_head_sha, changed_files, GitError};
pub use graph::DependencyGraph;
pub use orchestrator::{
    FailedLayer, JobBackend, JobHandle, JobOutcome, JobStatus, Orchestrator, PipelineResult,
    PipelineStatus,
};
pub use planner::{compute_layers, plan, ExecutionPlan, Layer};
pub use report::{render_pipeline, render_plan, write_result_json};
pub use telemetry::init_tracing;

/// monoflow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
