//! Module dependency graph.
//!
//! Models modules as nodes in a directed acyclic graph. An edge `u → v`
//! means "u depends on v": v must complete before u may run.
//!
//! The graph is validated once at construction (unknown dependencies,
//! duplicate monikers, cycles) and is read-only afterwards.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::contract::Module;
use crate::error::{PlanningError, PlanningResult};

/// Validated, acyclic dependency graph over [`Module`]s.
///
/// Nodes are keyed by moniker in a `BTreeMap` so every traversal visits them
/// in a stable order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Module>,
    /// `dependency → {dependent, ...}` (downstream adjacency)
    downstream: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build and validate a graph from module declarations.
    ///
    /// Returns [`PlanningError::DuplicateModule`] if a moniker is declared
    /// twice, [`PlanningError::UnknownDependency`] if a module references a
    /// moniker that is not declared, and [`PlanningError::CycleDetected`] if
    /// the edges form a cycle.
    pub fn build(modules: impl IntoIterator<Item = Module>) -> PlanningResult<Self> {
        let mut nodes = BTreeMap::new();
        for module in modules {
            if nodes.contains_key(&module.moniker) {
                return Err(PlanningError::DuplicateModule {
                    moniker: module.moniker,
                });
            }
            nodes.insert(module.moniker.clone(), module);
        }

        let mut downstream: BTreeMap<String, BTreeSet<String>> = nodes
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();

        for module in nodes.values() {
            for dep in &module.dependencies {
                match downstream.get_mut(dep) {
                    Some(dependents) => {
                        dependents.insert(module.moniker.clone());
                    }
                    None => {
                        return Err(PlanningError::UnknownDependency {
                            module: module.moniker.clone(),
                            missing_dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        let graph = Self { nodes, downstream };
        if let Some(cycle_path) = graph.find_cycle() {
            return Err(PlanningError::CycleDetected { cycle_path });
        }
        Ok(graph)
    }

    /// Number of modules in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a module by moniker.
    pub fn module(&self, moniker: &str) -> Option<&Module> {
        self.nodes.get(moniker)
    }

    /// All modules, ordered by moniker.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.nodes.values()
    }

    /// All monikers, in sorted order.
    pub fn monikers(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Whether `moniker` exists and declares an executable unit.
    pub fn has_unit(&self, moniker: &str) -> bool {
        self.nodes.get(moniker).is_some_and(Module::has_unit)
    }

    /// Direct dependencies of `moniker` (modules it requires first).
    pub fn dependencies_of(&self, moniker: &str) -> PlanningResult<&BTreeSet<String>> {
        self.nodes
            .get(moniker)
            .map(|m| &m.dependencies)
            .ok_or_else(|| PlanningError::UnknownModule {
                moniker: moniker.to_string(),
            })
    }

    /// Direct dependents of `moniker` (modules that require it).
    pub fn dependents_of(&self, moniker: &str) -> PlanningResult<&BTreeSet<String>> {
        self.downstream
            .get(moniker)
            .ok_or_else(|| PlanningError::UnknownModule {
                moniker: moniker.to_string(),
            })
    }

    /// The targets plus every module reachable from them through dependency
    /// edges. An empty target list selects the whole graph.
    pub fn transitive_closure<I>(&self, targets: I) -> PlanningResult<BTreeSet<String>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut closure = BTreeSet::new();
        let mut queue = VecDeque::new();

        for target in targets {
            let target = target.as_ref();
            if !self.nodes.contains_key(target) {
                return Err(PlanningError::UnknownModule {
                    moniker: target.to_string(),
                });
            }
            if closure.insert(target.to_string()) {
                queue.push_back(target.to_string());
            }
        }

        if closure.is_empty() {
            return Ok(self.nodes.keys().cloned().collect());
        }

        while let Some(current) = queue.pop_front() {
            for dep in &self.nodes[&current].dependencies {
                if closure.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }

        Ok(closure)
    }

    /// All transitive dependents of `moniker` (BFS over downstream edges),
    /// excluding `moniker` itself.
    pub fn transitive_dependents_of(&self, moniker: &str) -> PlanningResult<BTreeSet<String>> {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(moniker);

        self.dependents_of(moniker)?;

        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.downstream.get(current) {
                for dep in dependents {
                    if visited.insert(dep.clone()) {
                        queue.push_back(dep.as_str());
                    }
                }
            }
        }

        Ok(visited)
    }

    /// DFS over dependency edges. Returns the first cycle found, as a path
    /// that starts and ends with the same moniker.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut done = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();
        for moniker in self.nodes.keys() {
            if let Some(cycle) = self.dfs_cycle(moniker, &mut done, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        done: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if on_stack.contains(node) {
            let start = path.iter().position(|&p| p == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }

        on_stack.insert(node);
        path.push(node);

        if let Some(module) = self.nodes.get(node) {
            for dep in &module.dependencies {
                if let Some(cycle) = self.dfs_cycle(dep.as_str(), done, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_stack.remove(node);
        done.insert(node);
        None
    }
}
