//! Error taxonomy for planning and execution.
//!
//! Planning errors abort a run before any job is triggered. Execution errors
//! are never returned from the orchestrator; they are recorded on the
//! [`crate::orchestrator::JobHandle`] of the module they belong to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors detected while building the graph or computing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    /// A module lists a dependency that no contract declares.
    #[error("module {module} depends on unknown module {missing_dependency}")]
    UnknownDependency {
        module: String,
        missing_dependency: String,
    },

    /// A requested target (or planned node) is not in the graph.
    #[error("unknown module: {moniker}")]
    UnknownModule { moniker: String },

    /// The dependency edges form a cycle. The path starts and ends with the
    /// same moniker.
    #[error("dependency cycle detected: {}", cycle_path.join(" -> "))]
    CycleDetected { cycle_path: Vec<String> },

    /// Two contracts declare the same moniker.
    #[error("module declared more than once: {moniker}")]
    DuplicateModule { moniker: String },

    /// Layering stalled with nodes left over on a graph that was validated
    /// acyclic.
    #[error("planning invariant violated, unplaced modules: {unplaced:?}")]
    PlanningInvariantViolated { unplaced: Vec<String> },
}

/// Result alias for planning operations.
pub type PlanningResult<T> = std::result::Result<T, PlanningError>;

/// Failure to talk to the job system, as reported by a
/// [`crate::orchestrator::JobBackend`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("job backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown run id: {run_id}")]
    UnknownRun { run_id: String },

    #[error("job for {moniker} rejected: {reason}")]
    Rejected { moniker: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a module ended up `Errored` rather than `Succeeded` or `Failed`.
///
/// Kept separate from job outcomes so reports can tell "the job broke" from
/// "the orchestrator lost contact with the job".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("trigger failed: {detail}")]
    TriggerFailed { detail: String },

    #[error("watch failed: {detail}")]
    WatchFailed { detail: String },

    #[error("watch timed out after {after_ms}ms")]
    WatchTimedOut { after_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("watch task panicked: {detail}")]
    WatchTaskPanicked { detail: String },
}

/// Errors produced while loading module contracts.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("failed to read contract manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse contract manifest {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("unsupported manifest format: {path} (expected .toml or .json)")]
    UnsupportedFormat { path: String },
}
