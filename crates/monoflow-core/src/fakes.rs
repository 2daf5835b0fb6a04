//! In-memory job backend for tests.
//!
//! [`ScriptedBackend`] satisfies the [`JobBackend`] contract without any
//! external system. Each moniker can be scripted to succeed, fail, error on
//! trigger or watch, stall, or panic; every trigger and resolution is logged
//! so tests can assert on ordering.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::orchestrator::{JobBackend, JobOutcome};

/// Scripted behaviour for one moniker. Unscripted monikers succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    Succeed,
    /// The job runs and reports failure.
    Fail(String),
    /// `trigger` returns an error.
    TriggerError(String),
    /// `watch` returns an error.
    WatchError(String),
    /// `watch` sleeps, then succeeds.
    Delay(Duration),
    /// `watch` panics.
    Panic,
}

/// One entry in the backend's call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Triggered(String),
    Resolved(String),
}

#[derive(Debug, Default)]
struct State {
    events: Vec<BackendEvent>,
    runs: HashMap<String, String>,
    next_run: u64,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    state: Mutex<State>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, moniker: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(moniker.into(), script);
        self
    }

    /// Monikers in the order `trigger` was called, including failed triggers.
    pub fn triggered(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BackendEvent::Triggered(m) => Some(m),
                BackendEvent::Resolved(_) => None,
            })
            .collect()
    }

    /// Full trigger/resolve log.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.state.lock().unwrap().events.clone()
    }

    fn script_for(&self, moniker: &str) -> Script {
        self.scripts.get(moniker).cloned().unwrap_or(Script::Succeed)
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn trigger(&self, moniker: &str, _git_ref: &str) -> Result<String, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(BackendEvent::Triggered(moniker.to_string()));

        if let Script::TriggerError(reason) = self.script_for(moniker) {
            return Err(BackendError::Unavailable(reason));
        }

        state.next_run += 1;
        let run_id = format!("run-{}-{}", state.next_run, moniker);
        state.runs.insert(run_id.clone(), moniker.to_string());
        Ok(run_id)
    }

    async fn watch(&self, run_id: &str) -> Result<JobOutcome, BackendError> {
        let moniker = self
            .state
            .lock()
            .unwrap()
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| BackendError::UnknownRun {
                run_id: run_id.to_string(),
            })?;

        let result = match self.script_for(&moniker) {
            Script::Succeed | Script::TriggerError(_) => Ok(JobOutcome::Succeeded),
            Script::Fail(detail) => Ok(JobOutcome::Failed { detail }),
            Script::WatchError(reason) => Err(BackendError::Unavailable(reason)),
            Script::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(JobOutcome::Succeeded)
            }
            Script::Panic => panic!("scripted watch panic for {moniker}"),
        };

        self.state
            .lock()
            .unwrap()
            .events
            .push(BackendEvent::Resolved(moniker));
        result
    }
}
