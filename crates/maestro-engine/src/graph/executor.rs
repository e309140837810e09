use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use maestro_core::config::MaestroConfig;
use maestro_core::error::{MaestroError, Result};
use maestro_core::types::StepResult;

use super::node::DagNode;
use super::scheduler::{critical_path, DagPlan};
use crate::context::RunContext;
use crate::steps::{secs, Step};

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Which node was executed.
    pub name: String,
    /// The node's own result, before aggregation.
    pub result: StepResult,
    /// Wall-clock time from dispatch to completion.
    pub duration: Duration,
}

/// Per-node breakdown of a DAG run.
#[derive(Debug, Clone)]
pub struct DagReport {
    /// Per-node results in topological order.
    pub node_results: Vec<NodeResult>,
    /// Node names in the order they finished.
    pub completion_order: Vec<String>,
    /// Wall-clock time for the whole DAG.
    pub total_duration: Duration,
    /// Longest duration-weighted dependency chain.
    pub critical_path: Duration,
    /// Nodes on that chain, root first.
    pub critical_path_nodes: Vec<String>,
}

/// Composite step that runs named children as their dependencies complete.
///
/// The graph is validated at construction: an empty DAG, duplicate names,
/// unknown dependencies, and cycles are all rejected before anything runs.
pub struct DagStep {
    name: String,
    nodes: Vec<DagNode>,
    plan: DagPlan,
    max_concurrency: usize,
}

impl DagStep {
    pub fn new(nodes: Vec<DagNode>) -> Result<Self> {
        let plan = DagPlan::build(&nodes)?;
        Ok(Self {
            name: "dag".to_string(),
            nodes,
            plan,
            max_concurrency: 0,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cap the number of nodes in flight at once (0 = unlimited).
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Concurrency cap from `[engine] dag_max_concurrency`.
    pub fn with_config(self, config: &MaestroConfig) -> Self {
        self.with_max_concurrency(config.engine.dag_max_concurrency)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Node names in topological order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.plan
            .order
            .iter()
            .map(|&i| self.nodes[i].name.as_str())
            .collect()
    }

    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    fn node_input(&self, i: usize, input: &str, results: &[Option<StepResult>]) -> String {
        let deps = &self.plan.deps[i];
        if deps.is_empty() {
            return input.to_string();
        }
        deps.iter()
            .filter_map(|&d| results[d].as_ref().map(|r| r.output.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute the DAG and return both the aggregated result and a per-node report.
    pub async fn execute_with_report(
        &self,
        input: String,
        ctx: RunContext,
    ) -> Result<(StepResult, DagReport)> {
        let start = Instant::now();
        let n = self.nodes.len();
        info!(dag = %self.name, nodes = n, "Executing DAG");

        let mut remaining: Vec<usize> = self.plan.deps.iter().map(Vec::len).collect();
        let mut results: Vec<Option<StepResult>> = vec![None; n];
        let mut durations = vec![Duration::ZERO; n];
        let mut completion_order = Vec::with_capacity(n);
        let mut ready: VecDeque<usize> = self.plan.roots().collect();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<MaestroError> = None;

        loop {
            // Stop dispatching after the first failure; in-flight siblings drain.
            while failure.is_none()
                && (self.max_concurrency == 0 || in_flight.len() < self.max_concurrency)
            {
                let Some(i) = ready.pop_front() else { break };
                let node = &self.nodes[i];
                let node_input = self.node_input(i, &input, &results);
                let node_ctx = ctx.clone();
                debug!(dag = %self.name, node = %node.name, "Dispatching DAG node");
                in_flight.push(async move {
                    let node_start = Instant::now();
                    let outcome = node.step.execute(node_input, node_ctx).await;
                    (i, node_start.elapsed(), outcome)
                });
            }

            if in_flight.is_empty() {
                break;
            }

            let (i, elapsed, outcome) = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    warn!(dag = %self.name, "DAG cancelled");
                    return Err(MaestroError::Cancelled);
                }
                Some(done) = in_flight.next() => done,
            };

            let name = &self.nodes[i].name;
            match outcome {
                Ok(result) => {
                    info!(
                        dag = %self.name,
                        node = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "DAG node completed"
                    );
                    durations[i] = elapsed;
                    results[i] = Some(result);
                    completion_order.push(i);
                    for &d in &self.plan.dependents[i] {
                        remaining[d] -= 1;
                        if remaining[d] == 0 {
                            ready.push_back(d);
                        }
                    }
                }
                Err(e) => {
                    error!(dag = %self.name, node = %name, error = %e, "DAG node failed");
                    if failure.is_none() {
                        failure = Some(MaestroError::NodeFailed {
                            node: name.clone(),
                            source: Box::new(e),
                        });
                    }
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        let total_duration = start.elapsed();
        let (critical, chain) = critical_path(&self.plan, &durations);
        let names = |idx: &[usize]| -> Vec<String> {
            idx.iter().map(|&i| self.nodes[i].name.clone()).collect()
        };

        let mut node_results = Vec::with_capacity(n);
        for &i in &self.plan.order {
            let Some(result) = results[i].take() else {
                return Err(MaestroError::NodeFailed {
                    node: self.nodes[i].name.clone(),
                    source: Box::new(MaestroError::Cancelled),
                });
            };
            node_results.push(NodeResult {
                name: self.nodes[i].name.clone(),
                result,
                duration: durations[i],
            });
        }

        let sink_output = node_results
            .last()
            .map(|r| r.result.output.clone())
            .unwrap_or_default();
        let mut merged = StepResult::new(sink_output).with_duration(total_duration);
        for node in &node_results {
            let prefix = format!("dag.node.{}", node.name);
            merged.absorb(&node.result, &prefix);
            merged.iteration_count += node.result.iteration_count;
            merged.set_metadata(format!("{}.duration", prefix), secs(node.duration));
        }
        merged.set_metadata("dag.node_count", n);
        merged.set_metadata("dag.total_duration", secs(total_duration));
        merged.set_metadata("dag.critical_path_duration", secs(critical));
        merged.set_metadata("dag.critical_path", names(&chain));
        merged.set_metadata("dag.execution_order", names(&self.plan.order));
        merged.set_metadata("dag.completion_order", names(&completion_order));

        info!(
            dag = %self.name,
            total_ms = total_duration.as_millis() as u64,
            critical_path_ms = critical.as_millis() as u64,
            "DAG completed"
        );

        let report = DagReport {
            node_results,
            completion_order: names(&completion_order),
            total_duration,
            critical_path: critical,
            critical_path_nodes: names(&chain),
        };
        Ok((merged, report))
    }
}

impl Step for DagStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let (result, _report) = self.execute_with_report(input, ctx).await?;
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::AgentStep;
    use maestro_test_utils::{FailingAgent, MockAgent, SlowAgent};
    use std::sync::Arc;

    fn slow(name: &str, secs: u64) -> DagNode {
        DagNode::new(
            name,
            Arc::new(AgentStep::new(Arc::new(SlowAgent::new(
                name,
                Duration::from_secs(secs),
            )))),
        )
    }

    fn diamond() -> DagStep {
        DagStep::new(vec![
            slow("A", 1),
            slow("B", 2).depends_on(["A"]),
            slow("C", 5).depends_on(["A"]),
            slow("D", 1).depends_on(["B", "C"]),
        ])
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_diamond_critical_path() {
        let dag = diamond();
        let (result, report) = dag
            .execute_with_report("go".into(), RunContext::new("go"))
            .await
            .unwrap();

        assert_eq!(report.critical_path, Duration::from_secs(7));
        assert_eq!(report.critical_path_nodes, vec!["A", "C", "D"]);
        // B and C overlap, so wall-clock equals the critical path.
        assert_eq!(report.total_duration, Duration::from_secs(7));
        assert_eq!(result.metadata["dag.critical_path_duration"], 7.0);
        assert_eq!(result.metadata["dag.node_count"], 4);
        assert_eq!(
            report.node_results.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "C", "D"]
        );
        assert_eq!(report.completion_order, vec!["A", "B", "C", "D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_input_joins_dependency_outputs() {
        let dag = diamond();
        let result = dag.execute("go".into(), RunContext::new("go")).await.unwrap();
        // D sees B's then C's output, each derived from A's.
        assert_eq!(result.output, "D: B: A: go\nC: A: go");
        assert_eq!(result.metadata_str("dag.node.D.agent"), Some("D"));
        assert!(result.metadata.contains_key("dag.node.C.duration"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependencies_finish_before_dependents_start() {
        let dag = diamond();
        let ctx = RunContext::new("go");
        dag.execute("go".into(), ctx.clone()).await.unwrap();

        let path = ctx.execution_path().await;
        let pos = |n: &str| path.iter().position(|p| p == n).unwrap();
        assert_eq!(pos("A"), 0);
        assert!(pos("D") > pos("B"));
        assert!(pos("D") > pos("C"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_roots_run_concurrently() {
        let dag = DagStep::new(vec![slow("x", 3), slow("y", 3), slow("z", 3)]).unwrap();
        let (_, report) = dag
            .execute_with_report("in".into(), RunContext::new("in"))
            .await
            .unwrap();
        assert_eq!(report.total_duration, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_concurrency_bounds_in_flight() {
        let dag = DagStep::new(vec![slow("x", 3), slow("y", 3), slow("z", 3)])
            .unwrap()
            .with_max_concurrency(1);
        let (_, report) = dag
            .execute_with_report("in".into(), RunContext::new("in"))
            .await
            .unwrap();
        assert_eq!(report.total_duration, Duration::from_secs(9));
        assert_eq!(report.completion_order, vec!["x", "y", "z"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_caps_concurrency() {
        let config = MaestroConfig::parse("[engine]\ndag_max_concurrency = 2\n").unwrap();
        let dag = DagStep::new(vec![slow("x", 3), slow("y", 3), slow("z", 3)])
            .unwrap()
            .with_config(&config);
        assert_eq!(dag.max_concurrency(), 2);

        let (_, report) = dag
            .execute_with_report("in".into(), RunContext::new("in"))
            .await
            .unwrap();
        assert_eq!(report.total_duration, Duration::from_secs(6));

        let unbounded = DagStep::new(vec![slow("x", 3), slow("y", 3), slow("z", 3)])
            .unwrap()
            .with_config(&MaestroConfig::default());
        let (_, report) = unbounded
            .execute_with_report("in".into(), RunContext::new("in"))
            .await
            .unwrap();
        assert_eq!(report.total_duration, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_node_drains_siblings_and_skips_dependents() {
        let sibling = Arc::new(SlowAgent::new("sibling", Duration::from_secs(2)));
        let downstream = Arc::new(MockAgent::echo("downstream"));
        let dag = DagStep::new(vec![
            DagNode::new("bad", Arc::new(AgentStep::new(Arc::new(FailingAgent::new("bad", "boom"))))),
            DagNode::new("sibling", Arc::new(AgentStep::new(sibling.clone()))),
            DagNode::new("downstream", Arc::new(AgentStep::new(downstream.clone())))
                .depends_on(["bad", "sibling"]),
        ])
        .unwrap();

        let err = dag.execute("go".into(), RunContext::new("go")).await.unwrap_err();
        match &err {
            MaestroError::NodeFailed { node, source } => {
                assert_eq!(node, "bad");
                assert!(matches!(**source, MaestroError::AgentExecution { .. }));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(sibling.completed(), 1);
        assert_eq!(downstream.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_fan_out() {
        let dag = DagStep::new(vec![slow("x", 60), slow("y", 60)]).unwrap();
        let ctx = RunContext::new("go");
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = dag.execute("go".into(), ctx).await.unwrap_err();
        assert!(matches!(err, MaestroError::Cancelled));
    }

    #[test]
    fn test_construction_rejects_cycles() {
        let err = DagStep::new(vec![
            slow("a", 1).depends_on(["b"]),
            slow("b", 1).depends_on(["a"]),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, MaestroError::DependencyCycle { .. }));
    }
}
