//! Module contracts: what each module is, what it depends on, and how its
//! executable unit is launched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ContractError;

/// The executable unit (CI job) attached to a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Timeout in seconds. `0` disables the timeout.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Extra environment variables for the job.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl UnitSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            timeout_secs: 0,
            env: BTreeMap::new(),
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A module declared in a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Unique identifier.
    pub moniker: String,

    /// Repository-relative directory owned by the module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Monikers that must complete before this module runs.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// Executable unit, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitSpec>,
}

impl Module {
    pub fn new(moniker: impl Into<String>) -> Self {
        Self {
            moniker: moniker.into(),
            path: None,
            dependencies: BTreeSet::new(),
            unit: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_unit(mut self, unit: UnitSpec) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Whether an executable unit exists for this module.
    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }
}

/// Snapshot provider for the module contracts of one invocation.
pub trait ContractSource {
    fn load(&self) -> Result<Vec<Module>, ContractError>;
}

/// In-memory contract source.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    modules: Vec<Module>,
}

impl StaticSource {
    pub fn new(modules: Vec<Module>) -> Self {
        Self { modules }
    }
}

impl ContractSource for StaticSource {
    fn load(&self) -> Result<Vec<Module>, ContractError> {
        Ok(self.modules.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, rename = "module", alias = "modules")]
    modules: Vec<Module>,
}

/// Contract source backed by a TOML or JSON manifest file.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    path: PathBuf,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContractSource for ManifestSource {
    fn load(&self) -> Result<Vec<Module>, ContractError> {
        let path_str = self.path.display().to_string();
        let content = std::fs::read_to_string(&self.path).map_err(|source| ContractError::Io {
            path: path_str.clone(),
            source,
        })?;

        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let manifest: Manifest = match ext.as_deref() {
            Some("toml") => toml::from_str(&content).map_err(|e| ContractError::Parse {
                path: path_str.clone(),
                detail: e.to_string(),
            })?,
            Some("json") => serde_json::from_str(&content).map_err(|e| ContractError::Parse {
                path: path_str.clone(),
                detail: e.to_string(),
            })?,
            _ => return Err(ContractError::UnsupportedFormat { path: path_str }),
        };

        debug!(path = %path_str, modules = manifest.modules.len(), "loaded contract manifest");
        Ok(manifest.modules)
    }
}
