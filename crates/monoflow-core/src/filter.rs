//! Dropping modules without an executable unit from a computed plan.
//!
//! Filtering never re-layers. Layers are computed over the full closure,
//! unit-less modules included, and only then thinned out. Re-layering the
//! reduced set would lose orderings that exist only through a unit-less
//! module: with `C → A → B` and `A` unit-less, `C` and `B` would otherwise
//! share a layer.

use crate::graph::DependencyGraph;
use crate::planner::{ExecutionPlan, Layer};

/// Keep only monikers for which `has_unit` holds, preserving layer order and
/// dropping layers that become empty.
pub fn filter_plan<F>(plan: &ExecutionPlan, has_unit: F) -> ExecutionPlan
where
    F: Fn(&str) -> bool,
{
    let layers: Vec<Layer> = plan
        .layers()
        .iter()
        .map(|layer| {
            layer
                .iter()
                .filter(|m| has_unit(m.as_str()))
                .cloned()
                .collect::<Layer>()
        })
        .filter(|layer| !layer.is_empty())
        .collect();
    ExecutionPlan::new(layers)
}

/// [`filter_plan`] using the units declared in `graph`.
pub fn filter_by_units(plan: &ExecutionPlan, graph: &DependencyGraph) -> ExecutionPlan {
    filter_plan(plan, |m| graph.has_unit(m))
}
