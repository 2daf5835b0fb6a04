//! [`JobBackend`] that runs each module's unit as a local subprocess.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use monoflow_core::{BackendError, DependencyGraph, JobBackend, JobOutcome, Module, UnitSpec};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::runner::{spawn_unit, RunningUnit};

#[derive(Debug, Clone)]
struct UnitTarget {
    unit: UnitSpec,
    dir: PathBuf,
}

/// Runs units with `tokio::process`.
///
/// `trigger` spawns the child and parks it under a fresh UUID run id;
/// `watch` takes it back out and waits for exit. Children still parked, or
/// whose `watch` future is dropped (e.g. on cancellation), are killed.
#[derive(Debug)]
pub struct ProcessJobBackend {
    workdir: PathBuf,
    units: BTreeMap<String, UnitTarget>,
    runs: Mutex<HashMap<String, RunningUnit>>,
}

impl ProcessJobBackend {
    /// Backend rooted at `workdir` with no registered units.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            units: BTreeMap::new(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Backend for every module of `graph` that has a unit.
    pub fn from_graph(graph: &DependencyGraph, workdir: impl Into<PathBuf>) -> Self {
        graph
            .modules()
            .fold(Self::new(workdir), |backend, module| backend.with_module(module))
    }

    /// Register `module`'s unit, run in `workdir/<module.path>` when the module
    /// declares a path. Modules without a unit are ignored.
    pub fn with_module(mut self, module: &Module) -> Self {
        if let Some(unit) = &module.unit {
            let dir = match &module.path {
                Some(path) => self.workdir.join(path),
                None => self.workdir.clone(),
            };
            self.units.insert(
                module.moniker.clone(),
                UnitTarget {
                    unit: unit.clone(),
                    dir,
                },
            );
        }
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Whether a unit is registered for `moniker`.
    pub fn has_unit(&self, moniker: &str) -> bool {
        self.units.contains_key(moniker)
    }

    /// Number of triggered runs not yet watched.
    pub fn in_flight(&self) -> usize {
        self.lock_runs().map(|runs| runs.len()).unwrap_or(0)
    }

    fn lock_runs(&self) -> Result<MutexGuard<'_, HashMap<String, RunningUnit>>, BackendError> {
        self.runs
            .lock()
            .map_err(|_| BackendError::Unavailable("run table lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobBackend for ProcessJobBackend {
    #[instrument(skip(self))]
    async fn trigger(&self, moniker: &str, git_ref: &str) -> Result<String, BackendError> {
        let target = self
            .units
            .get(moniker)
            .ok_or_else(|| BackendError::Rejected {
                moniker: moniker.to_string(),
                reason: "no unit registered".to_string(),
            })?;

        let running = spawn_unit(moniker, &target.unit, &target.dir, git_ref)?;
        let run_id = Uuid::new_v4().to_string();
        debug!(
            run_id = %run_id,
            pid = ?running.pid(),
            dir = %target.dir.display(),
            "unit spawned"
        );

        {
            let mut runs = self.lock_runs()?;
            runs.insert(run_id.clone(), running);
        }
        Ok(run_id)
    }

    #[instrument(skip(self))]
    async fn watch(&self, run_id: &str) -> Result<JobOutcome, BackendError> {
        let parked = {
            let mut runs = self.lock_runs()?;
            runs.remove(run_id)
        };
        let running = parked.ok_or_else(|| BackendError::UnknownRun {
            run_id: run_id.to_string(),
        })?;

        let result = running.wait().await?;
        debug!(
            moniker = %result.moniker,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            "unit exited"
        );
        Ok(result.into_outcome())
    }
}
