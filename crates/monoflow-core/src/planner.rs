//! Layered execution planning.
//!
//! Layers are computed with Kahn's algorithm over the subgraph induced by the
//! planned node set: each round peels every node whose in-set dependencies
//! are all placed. A node therefore lands in the earliest layer its
//! dependencies allow, which gives the minimum layer count and the widest
//! layers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PlanningError, PlanningResult};
use crate::graph::DependencyGraph;

/// A set of modules that may run concurrently, sorted by moniker.
pub type Layer = BTreeSet<String>;

/// An ordered sequence of layers. Every dependency of a module sits in a
/// strictly earlier layer than the module itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    layers: Vec<Layer>,
}

impl ExecutionPlan {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total number of modules across all layers.
    pub fn module_count(&self) -> usize {
        self.layers.iter().map(BTreeSet::len).sum()
    }

    /// Index of the layer containing `moniker`.
    pub fn layer_index(&self, moniker: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.contains(moniker))
    }

    /// Every moniker in plan order.
    pub fn monikers(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().flatten().map(String::as_str)
    }

    /// SHA-256 fingerprint of the ordered layers.
    ///
    /// Two plans share a digest exactly when they contain the same monikers
    /// in the same layers.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for layer in &self.layers {
            for moniker in layer {
                hasher.update(moniker.as_bytes());
                hasher.update(b"\0");
            }
            hasher.update(b"\x1e");
        }
        hex::encode(hasher.finalize())
    }
}

/// Partition `node_set` into layers of maximal parallelism.
///
/// Only edges with both endpoints in `node_set` are considered. Returns
/// [`PlanningError::UnknownModule`] for a node the graph does not contain,
/// and [`PlanningError::PlanningInvariantViolated`] if layering stalls with
/// nodes left over.
pub fn compute_layers(
    graph: &DependencyGraph,
    node_set: &BTreeSet<String>,
) -> PlanningResult<ExecutionPlan> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for moniker in node_set {
        let deps = graph.dependencies_of(moniker)?;
        let unresolved = deps.iter().filter(|d| node_set.contains(*d)).count();
        in_degree.insert(moniker.as_str(), unresolved);
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut layers: Vec<Layer> = Vec::new();
    let mut placed = 0usize;

    while !ready.is_empty() {
        let mut next: BTreeSet<&str> = BTreeSet::new();
        for &moniker in &ready {
            for dependent in graph.dependents_of(moniker)? {
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.insert(dependent.as_str());
                    }
                }
            }
        }
        placed += ready.len();
        layers.push(ready.iter().map(|s| s.to_string()).collect());
        ready = next;
    }

    if placed != node_set.len() {
        let unplaced = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(PlanningError::PlanningInvariantViolated { unplaced });
    }

    debug!(
        layers = layers.len(),
        modules = placed,
        "computed execution layers"
    );
    Ok(ExecutionPlan::new(layers))
}

/// Closure of `targets` followed by [`compute_layers`]. An empty target list
/// plans the whole graph.
pub fn plan<I>(graph: &DependencyGraph, targets: I) -> PlanningResult<ExecutionPlan>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let closure = graph.transitive_closure(targets)?;
    compute_layers(graph, &closure)
}
