use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use maestro_core::error::{MaestroError, Result};

use super::node::DagNode;

/// Validated dependency structure of a DAG, indexed by declaration position.
#[derive(Debug, Clone)]
pub struct DagPlan {
    /// Node indices in topological order.
    pub order: Vec<usize>,
    /// `deps[i]`: indices node `i` waits on, in declared order.
    pub deps: Vec<Vec<usize>>,
    /// `dependents[i]`: indices waiting on node `i`, in declaration order.
    pub dependents: Vec<Vec<usize>>,
}

impl DagPlan {
    /// Validate `nodes` and compute a topological order with Kahn's algorithm.
    ///
    /// Fails on an empty DAG, a duplicate name, a dependency naming no
    /// sibling, or a cycle. Ties are broken by declaration order, so the
    /// order is deterministic.
    pub fn build(nodes: &[DagNode]) -> Result<Self> {
        if nodes.is_empty() {
            return Err(MaestroError::EmptyDag);
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name.as_str(), i).is_some() {
                return Err(MaestroError::DuplicateNode {
                    node: node.name.clone(),
                });
            }
        }

        let mut deps = Vec::with_capacity(nodes.len());
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            let mut resolved = Vec::with_capacity(node.dependencies.len());
            for dep in &node.dependencies {
                let &j = index
                    .get(dep.as_str())
                    .ok_or_else(|| MaestroError::MissingDependency {
                        node: node.name.clone(),
                        dependency: dep.clone(),
                    })?;
                resolved.push(j);
                dependents[j].push(i);
            }
            deps.push(resolved);
        }

        let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &d in &dependents[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    ready.push_back(d);
                }
            }
        }

        if order.len() < nodes.len() {
            let visited: HashSet<usize> = order.iter().copied().collect();
            let stuck = (0..nodes.len())
                .filter(|i| !visited.contains(i))
                .map(|i| nodes[i].name.clone())
                .collect();
            return Err(MaestroError::DependencyCycle { nodes: stuck });
        }

        Ok(Self {
            order,
            deps,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Indices with no dependencies, in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.deps.len()).filter(|&i| self.deps[i].is_empty())
    }

    /// Index of the last node in topological order.
    pub fn sink(&self) -> usize {
        self.order[self.order.len() - 1]
    }
}

/// Longest duration-weighted dependency chain.
///
/// `longest[n] = max(longest[d] for d in deps[n], default 0) + durations[n]`,
/// evaluated in topological order. Returns the maximum over all nodes and
/// the chain that achieves it, root first.
pub fn critical_path(plan: &DagPlan, durations: &[Duration]) -> (Duration, Vec<usize>) {
    let n = plan.deps.len();
    let mut longest = vec![Duration::ZERO; n];
    let mut via: Vec<Option<usize>> = vec![None; n];

    for &i in &plan.order {
        let mut best = Duration::ZERO;
        for &d in &plan.deps[i] {
            if via[i].is_none() || longest[d] > best {
                best = longest[d];
                via[i] = Some(d);
            }
        }
        longest[i] = best + durations[i];
    }

    let Some(end) = plan
        .order
        .iter()
        .copied()
        .reduce(|a, b| if longest[b] > longest[a] { b } else { a })
    else {
        return (Duration::ZERO, vec![]);
    };

    let mut chain = vec![end];
    let mut cur = end;
    while let Some(prev) = via[cur] {
        chain.push(prev);
        cur = prev;
    }
    chain.reverse();
    (longest[end], chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::NoOp;
    use std::sync::Arc;

    fn node(name: &str, deps: &[&str]) -> DagNode {
        DagNode::new(name, Arc::new(NoOp)).depends_on(deps.iter().copied())
    }

    fn names(nodes: &[DagNode], idx: &[usize]) -> Vec<String> {
        idx.iter().map(|&i| nodes[i].name.clone()).collect()
    }

    fn diamond() -> Vec<DagNode> {
        vec![
            node("A", &[]),
            node("B", &["A"]),
            node("C", &["A"]),
            node("D", &["B", "C"]),
        ]
    }

    #[test]
    fn test_topological_order_visits_every_node_once() {
        let nodes = diamond();
        let plan = DagPlan::build(&nodes).unwrap();
        assert_eq!(names(&nodes, &plan.order), vec!["A", "B", "C", "D"]);
        assert_eq!(plan.sink(), 3);
        assert_eq!(plan.roots().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_order_respects_dependencies_regardless_of_declaration() {
        let nodes = vec![
            node("report", &["fetch", "parse"]),
            node("parse", &["fetch"]),
            node("fetch", &[]),
        ];
        let plan = DagPlan::build(&nodes).unwrap();
        assert_eq!(names(&nodes, &plan.order), vec!["fetch", "parse", "report"]);

        let position: HashMap<usize, usize> =
            plan.order.iter().enumerate().map(|(pos, &i)| (i, pos)).collect();
        for (i, deps) in plan.deps.iter().enumerate() {
            for d in deps {
                assert!(position[d] < position[&i]);
            }
        }
    }

    #[test]
    fn test_empty_dag_rejected() {
        assert!(matches!(DagPlan::build(&[]), Err(MaestroError::EmptyDag)));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = DagPlan::build(&[node("a", &[]), node("a", &[])]).unwrap_err();
        assert!(matches!(err, MaestroError::DuplicateNode { ref node } if node == "a"));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let err = DagPlan::build(&[node("a", &["ghost"])]).unwrap_err();
        match err {
            MaestroError::MissingDependency { node, dependency } => {
                assert_eq!(node, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cycle_rejected() {
        let nodes = vec![
            node("start", &[]),
            node("a", &["start", "c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ];
        let err = DagPlan::build(&nodes).unwrap_err();
        assert!(err.is_construction_defect());
        match err {
            MaestroError::DependencyCycle { nodes } => assert_eq!(nodes, vec!["a", "b", "c"]),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = DagPlan::build(&[node("a", &["a"])]).unwrap_err();
        assert!(matches!(err, MaestroError::DependencyCycle { .. }));
    }

    #[test]
    fn test_critical_path_takes_longest_chain() {
        let nodes = diamond();
        let plan = DagPlan::build(&nodes).unwrap();
        let durations = [1, 2, 5, 1].map(Duration::from_secs);

        let (total, chain) = critical_path(&plan, &durations);
        assert_eq!(total, Duration::from_secs(7));
        assert_eq!(names(&nodes, &chain), vec!["A", "C", "D"]);
    }

    #[test]
    fn test_critical_path_of_independent_nodes() {
        let nodes = vec![node("x", &[]), node("y", &[])];
        let plan = DagPlan::build(&nodes).unwrap();
        let (total, chain) = critical_path(&plan, &[Duration::from_secs(3), Duration::from_secs(4)]);
        assert_eq!(total, Duration::from_secs(4));
        assert_eq!(names(&nodes, &chain), vec!["y"]);
    }
}
