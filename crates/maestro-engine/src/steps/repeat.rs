use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::debug;

use maestro_core::error::{MaestroError, Result};
use maestro_core::types::StepResult;

use super::{secs, Predicate, Step};
use crate::context::RunContext;

/// Bounded loop. The condition is checked against the current output before
/// every iteration, so a false condition on entry runs the body zero times.
pub struct RepeatWhile {
    name: String,
    condition: Predicate,
    body: Arc<dyn Step>,
    max_iterations: usize,
}

impl RepeatWhile {
    pub fn new(condition: Predicate, body: Arc<dyn Step>, max_iterations: usize) -> Result<Self> {
        if max_iterations == 0 {
            return Err(MaestroError::InvalidConfig(
                "RepeatWhile max_iterations must be greater than 0".into(),
            ));
        }
        Ok(Self {
            name: "repeat".to_string(),
            condition,
            body,
            max_iterations,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }
}

impl Step for RepeatWhile {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let start = Instant::now();
            let mut result = StepResult::new(input);
            let mut iterations = 0;

            let terminated_by = loop {
                if !(self.condition)(&result.output) {
                    break "condition";
                }
                if iterations == self.max_iterations {
                    break "maxIterations";
                }
                debug!(repeat = %self.name, iteration = iterations, "Running loop body");
                let child = self.body.execute(result.output.clone(), ctx.clone()).await?;
                result.absorb(&child, &format!("repeat.iteration.{}", iterations));
                result.output = child.output;
                iterations += 1;
            };

            result.iteration_count = iterations;
            result.duration = start.elapsed();
            result.set_metadata("repeat.iterations", iterations);
            result.set_metadata("repeat.terminated_by", terminated_by);
            result.set_metadata("repeat.duration", secs(result.duration));
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{predicate, AgentStep};
    use maestro_test_utils::{FailingAgent, MockAgent};

    #[test]
    fn test_zero_max_iterations_rejected() {
        let err = RepeatWhile::new(
            predicate(|_| true),
            Arc::new(AgentStep::new(Arc::new(MockAgent::echo("a")))),
            0,
        )
        .err()
        .unwrap();
        assert!(err.is_construction_defect());
    }

    #[tokio::test]
    async fn test_false_on_entry_never_runs_body() {
        let body = Arc::new(MockAgent::echo("body"));
        let repeat = RepeatWhile::new(
            predicate(|_| false),
            Arc::new(AgentStep::new(body.clone())),
            5,
        )
        .unwrap();

        let result = repeat.execute("input".into(), RunContext::new("input")).await.unwrap();
        assert_eq!(result.output, "input");
        assert_eq!(body.call_count(), 0);
        assert_eq!(result.metadata_str("repeat.terminated_by"), Some("condition"));
        assert_eq!(result.iteration_count, 0);
    }

    #[tokio::test]
    async fn test_stops_at_max_iterations() {
        let body = Arc::new(MockAgent::new("body", |s| format!("{}+", s)));
        let repeat = RepeatWhile::new(
            predicate(|_| true),
            Arc::new(AgentStep::new(body.clone())),
            3,
        )
        .unwrap();

        let result = repeat.execute("x".into(), RunContext::new("x")).await.unwrap();
        assert_eq!(body.call_count(), 3);
        assert_eq!(result.output, "x+++");
        assert_eq!(result.iteration_count, 3);
        assert_eq!(result.metadata_str("repeat.terminated_by"), Some("maxIterations"));
        assert_eq!(result.metadata_str("repeat.iteration.0.agent"), Some("body"));
        assert_eq!(result.metadata_str("repeat.iteration.2.agent"), Some("body"));
    }

    #[tokio::test]
    async fn test_condition_sees_each_output() {
        let body = Arc::new(MockAgent::new("grow", |s| format!("{}x", s)));
        let repeat = RepeatWhile::new(
            predicate(|s| s.len() < 4),
            Arc::new(AgentStep::new(body.clone())),
            10,
        )
        .unwrap();

        let result = repeat.execute("a".into(), RunContext::new("a")).await.unwrap();
        assert_eq!(result.output, "axxx");
        assert_eq!(body.call_count(), 3);
        assert_eq!(result.metadata_str("repeat.terminated_by"), Some("condition"));
    }

    #[tokio::test]
    async fn test_body_failure_aborts_loop() {
        let repeat = RepeatWhile::new(
            predicate(|_| true),
            Arc::new(AgentStep::new(Arc::new(FailingAgent::new("body", "broken")))),
            3,
        )
        .unwrap();
        let err = repeat.execute("x".into(), RunContext::new("x")).await.unwrap_err();
        assert!(matches!(err, MaestroError::AgentExecution { .. }));
    }
}
