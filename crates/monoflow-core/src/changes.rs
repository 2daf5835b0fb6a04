//! Mapping changed files to the modules they affect.
//!
//! The impacted set seeds [`DependencyGraph::transitive_closure`] for
//! incremental runs.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::graph::DependencyGraph;

/// Anything able to turn changed paths into impacted monikers.
pub trait ChangeDetector {
    fn impacted(&self, changed_paths: &[PathBuf]) -> BTreeSet<String>;
}

/// Attributes each changed path to the module whose `path` is its longest
/// component-wise prefix.
#[derive(Debug, Clone)]
pub struct PathChangeDetector<'g> {
    graph: &'g DependencyGraph,
    /// `(normalized module path, moniker)`, longest paths first.
    owners: Vec<(PathBuf, String)>,
    include_dependents: bool,
}

impl<'g> PathChangeDetector<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        let mut owners: Vec<(PathBuf, String)> = graph
            .modules()
            .filter_map(|m| m.path.as_ref().map(|p| (normalize(p), m.moniker.clone())))
            .collect();
        owners.sort_by(|a, b| {
            b.0.components()
                .count()
                .cmp(&a.0.components().count())
                .then_with(|| a.1.cmp(&b.1))
        });
        Self {
            graph,
            owners,
            include_dependents: false,
        }
    }

    /// Also report every transitive dependent of an impacted module.
    pub fn with_dependents(mut self, include: bool) -> Self {
        self.include_dependents = include;
        self
    }

    /// Owning module of a single path, if any.
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        let path = normalize(path);
        self.owners
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, moniker)| moniker.as_str())
    }
}

impl ChangeDetector for PathChangeDetector<'_> {
    fn impacted(&self, changed_paths: &[PathBuf]) -> BTreeSet<String> {
        let mut impacted: BTreeSet<String> = changed_paths
            .iter()
            .filter_map(|p| {
                let owner = self.owner_of(p);
                if owner.is_none() {
                    debug!(path = %p.display(), "changed path has no owning module");
                }
                owner.map(str::to_string)
            })
            .collect();

        if self.include_dependents {
            let direct: Vec<String> = impacted.iter().cloned().collect();
            for moniker in direct {
                if let Ok(dependents) = self.graph.transitive_dependents_of(&moniker) {
                    impacted.extend(dependents);
                }
            }
        }

        impacted
    }
}

/// Drop `.` components and leading `./` so manifest paths and git output
/// compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
