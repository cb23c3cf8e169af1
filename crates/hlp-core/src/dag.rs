//! Plan dependency graph: arena construction, cycle detection, readiness.
//!
//! Units live in a flat arena indexed by `usize`; dependencies are index lists
//! in both directions. `petgraph` is used to detect cycles, and a depth-based
//! grouping gives a stable topological order (waves in depth order, document
//! order within a wave).

use std::collections::{BTreeSet, HashMap};

use hlp_types::plan::Plan;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::definition::PlanError;

/// One plan-unit in the arena.
#[derive(Debug, Clone)]
pub struct UnitNode {
    pub id: String,
    /// Index into `Plan::phases`.
    pub phase: usize,
    /// Declared, phase-implied and resolved dependencies.
    pub deps: Vec<usize>,
    pub dependents: Vec<usize>,
    /// Depth in the DAG; roots are 0.
    pub depth: usize,
}

/// Dependency graph of a validated plan.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    nodes: Vec<UnitNode>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
    phase_ids: Vec<String>,
    phase_units: Vec<Vec<usize>>,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl PlanGraph {
    /// Build the graph from declared and phase-implied dependencies.
    pub fn build(plan: &Plan) -> Result<Self, PlanError> {
        check_phase_cycles(plan)?;

        let phase_ids: Vec<String> = plan.phases.iter().map(|p| p.id.clone()).collect();
        let phase_index: HashMap<&str, usize> = plan
            .phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.as_str(), i))
            .collect();

        let mut nodes = Vec::with_capacity(plan.unit_count());
        let mut index = HashMap::new();
        let mut phase_units = vec![Vec::new(); plan.phases.len()];
        for (phase_idx, phase) in plan.phases.iter().enumerate() {
            for unit in &phase.units {
                let idx = nodes.len();
                index.insert(unit.id.clone(), idx);
                phase_units[phase_idx].push(idx);
                nodes.push(UnitNode {
                    id: unit.id.clone(),
                    phase: phase_idx,
                    deps: Vec::new(),
                    dependents: Vec::new(),
                    depth: 0,
                });
            }
        }

        // Collect dependency sets (deduplicated, deterministic order)
        let mut dep_sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        for phase in &plan.phases {
            let implied: Vec<usize> = phase
                .depends_on
                .iter()
                .filter_map(|dep| phase_index.get(dep.as_str()))
                .flat_map(|&p| phase_units[p].iter().copied())
                .collect();

            for unit in &phase.units {
                let idx = index[&unit.id];
                for dep in &unit.depends_on {
                    let dep_idx = index.get(dep).copied().ok_or_else(|| {
                        PlanError::UnknownDependency(format!(
                            "unit '{}' depends on unknown unit '{}'",
                            unit.id, dep
                        ))
                    })?;
                    if dep_idx == idx {
                        return Err(PlanError::CyclicDependency(format!(
                            "unit '{}' depends on itself",
                            unit.id
                        )));
                    }
                    dep_sets[idx].insert(dep_idx);
                }
                dep_sets[idx].extend(implied.iter().copied());
            }
        }

        // Directed graph: edge from dependency -> dependent
        let mut graph = DiGraph::<&str, ()>::new();
        let node_indices: Vec<_> = nodes.iter().map(|n| graph.add_node(n.id.as_str())).collect();
        for (idx, deps) in dep_sets.iter().enumerate() {
            for &dep in deps {
                graph.add_edge(node_indices[dep], node_indices[idx], ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            let unit_id = graph[cycle.node_id()];
            PlanError::CyclicDependency(format!("cycle detected involving unit '{unit_id}'"))
        })?;

        // Depth: roots are 0, otherwise max(dep depth) + 1
        let position: HashMap<_, usize> = node_indices
            .iter()
            .enumerate()
            .map(|(i, n)| (*n, i))
            .collect();
        let mut depths = vec![0usize; nodes.len()];
        for node in sorted {
            let idx = position[&node];
            depths[idx] = dep_sets[idx]
                .iter()
                .map(|&d| depths[d] + 1)
                .max()
                .unwrap_or(0);
        }

        for (idx, deps) in dep_sets.into_iter().enumerate() {
            for &dep in &deps {
                nodes[dep].dependents.push(idx);
            }
            nodes[idx].deps = deps.into_iter().collect();
            nodes[idx].depth = depths[idx];
        }

        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by_key(|&i| (nodes[i].depth, i));

        Ok(Self {
            nodes,
            index,
            order,
            phase_ids,
            phase_units,
        })
    }
}

/// Reject cycles between phases, even when the phases involved have no units.
fn check_phase_cycles(plan: &Plan) -> Result<(), PlanError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, _> = plan
        .phases
        .iter()
        .map(|p| (p.id.as_str(), graph.add_node(p.id.as_str())))
        .collect();
    for phase in &plan.phases {
        for dep in &phase.depends_on {
            let from = nodes.get(dep.as_str()).ok_or_else(|| {
                PlanError::UnknownDependency(format!(
                    "phase '{}' depends on unknown phase '{}'",
                    phase.id, dep
                ))
            })?;
            graph.add_edge(*from, nodes[phase.id.as_str()], ());
        }
    }
    toposort(&graph, None).map_err(|cycle| {
        PlanError::CyclicDependency(format!(
            "cycle detected involving phase '{}'",
            graph[cycle.node_id()]
        ))
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl PlanGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &UnitNode {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[UnitNode] {
        &self.nodes
    }

    pub fn index_of(&self, unit_id: &str) -> Option<usize> {
        self.index.get(unit_id).copied()
    }

    /// Stable topological order over all units.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    pub fn phase_ids(&self) -> &[String] {
        &self.phase_ids
    }

    pub fn phase_index(&self, phase_id: &str) -> Option<usize> {
        self.phase_ids.iter().position(|p| p == phase_id)
    }

    /// Units of a phase in document order.
    pub fn units_in_phase(&self, phase: usize) -> &[usize] {
        &self.phase_units[phase]
    }

    /// Units of a phase, dependents before their dependencies.
    pub fn reverse_order_in_phase(&self, phase: usize) -> Vec<usize> {
        self.order
            .iter()
            .rev()
            .copied()
            .filter(|&i| self.nodes[i].phase == phase)
            .collect()
    }

    /// Whether every dependency of `idx` satisfies `done`.
    pub fn is_ready(&self, idx: usize, done: impl Fn(usize) -> bool) -> bool {
        self.nodes[idx].deps.iter().all(|&d| done(d))
    }

    /// Group units into waves of mutually independent units, by depth.
    pub fn waves(&self) -> Vec<Vec<usize>> {
        let mut waves: Vec<Vec<usize>> = Vec::new();
        for &idx in &self.order {
            let depth = self.nodes[idx].depth;
            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(idx);
        }
        waves
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::parse_plan_yaml;

    fn ids(graph: &PlanGraph, idxs: &[usize]) -> Vec<String> {
        idxs.iter().map(|&i| graph.node(i).id.clone()).collect()
    }

    #[test]
    fn test_linear_chain_order_and_waves() {
        let plan = parse_plan_yaml(
            r#"
name: chain
phases:
  - id: p
    units:
      - {id: c, depends_on: [b]}
      - {id: b, depends_on: [a]}
      - {id: a}
"#,
        )
        .unwrap();
        let graph = PlanGraph::build(&plan).unwrap();
        assert_eq!(ids(&graph, graph.topological_order()), vec!["a", "b", "c"]);
        assert_eq!(graph.waves().len(), 3);
        let c = graph.index_of("c").unwrap();
        assert_eq!(ids(&graph, &graph.node(c).deps), vec!["b"]);
    }

    #[test]
    fn test_diamond_shares_a_wave() {
        let plan = parse_plan_yaml(
            r#"
name: diamond
phases:
  - id: p
    units:
      - {id: a}
      - {id: b, depends_on: [a]}
      - {id: c, depends_on: [a]}
      - {id: d, depends_on: [b, c]}
"#,
        )
        .unwrap();
        let graph = PlanGraph::build(&plan).unwrap();
        let waves = graph.waves();
        assert_eq!(waves.len(), 3);
        assert_eq!(ids(&graph, &waves[1]), vec!["b", "c"]);
        let d = graph.index_of("d").unwrap();
        assert_eq!(graph.node(d).deps.len(), 2);
        assert_eq!(graph.node(graph.index_of("a").unwrap()).dependents.len(), 2);
    }

    #[test]
    fn test_cycle_detected() {
        let plan = parse_plan_yaml(
            r#"
name: cycle
phases:
  - id: p
    units:
      - {id: a, depends_on: [c]}
      - {id: b, depends_on: [a]}
      - {id: c, depends_on: [b]}
"#,
        )
        .unwrap();
        let err = PlanGraph::build(&plan).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, PlanError::CyclicDependency(_)));
        assert!(msg.contains("cycle detected"), "got: {msg}");
    }

    #[test]
    fn test_phase_dependencies_imply_unit_edges() {
        let plan = parse_plan_yaml(
            r#"
name: phased
phases:
  - id: build
    units: [{id: compile}, {id: lint}]
  - id: ship
    depends_on: [build]
    units: [{id: publish}]
"#,
        )
        .unwrap();
        let graph = PlanGraph::build(&plan).unwrap();
        let publish = graph.index_of("publish").unwrap();
        assert_eq!(ids(&graph, &graph.node(publish).deps), vec!["compile", "lint"]);
        assert_eq!(graph.node(publish).phase, 1);
    }

    #[test]
    fn test_phase_cycle_without_units_detected() {
        let plan = parse_plan_yaml(
            r#"
name: phase-cycle
phases:
  - {id: one, depends_on: [two]}
  - {id: two, depends_on: [one]}
"#,
        )
        .unwrap();
        let msg = PlanGraph::build(&plan).unwrap_err().to_string();
        assert!(msg.contains("phase"), "got: {msg}");
    }

    #[test]
    fn test_reverse_order_in_phase() {
        let plan = parse_plan_yaml(
            r#"
name: reverse
phases:
  - id: p
    units:
      - {id: a}
      - {id: b, depends_on: [a]}
      - {id: c, depends_on: [a, b]}
  - id: q
    units: [{id: z}]
"#,
        )
        .unwrap();
        let graph = PlanGraph::build(&plan).unwrap();
        assert_eq!(ids(&graph, &graph.reverse_order_in_phase(0)), vec!["c", "b", "a"]);
        assert_eq!(ids(&graph, &graph.reverse_order_in_phase(1)), vec!["z"]);
    }

    #[test]
    fn test_is_ready() {
        let plan = parse_plan_yaml(
            r#"
name: ready
phases:
  - id: p
    units: [{id: a}, {id: b, depends_on: [a]}]
"#,
        )
        .unwrap();
        let graph = PlanGraph::build(&plan).unwrap();
        let a = graph.index_of("a").unwrap();
        let b = graph.index_of("b").unwrap();
        assert!(graph.is_ready(a, |_| false));
        assert!(!graph.is_ready(b, |_| false));
        assert!(graph.is_ready(b, |i| i == a));
    }

    #[test]
    fn test_empty_plan() {
        let plan = parse_plan_yaml("name: empty\nphases: []\n").unwrap();
        let graph = PlanGraph::build(&plan).unwrap();
        assert!(graph.is_empty());
        assert!(graph.waves().is_empty());
    }
}
