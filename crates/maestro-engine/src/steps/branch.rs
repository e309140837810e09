use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::debug;

use maestro_core::error::Result;
use maestro_core::types::StepResult;

use super::{secs, NoOp, Predicate, Step};
use crate::context::RunContext;

/// Conditional dispatch to exactly one of two children.
pub struct Branch {
    name: String,
    condition: Predicate,
    if_true: Arc<dyn Step>,
    if_false: Arc<dyn Step>,
}

impl Branch {
    /// Branch whose "otherwise" arm is a [`NoOp`].
    pub fn new(condition: Predicate, if_true: Arc<dyn Step>) -> Self {
        Self {
            name: "branch".to_string(),
            condition,
            if_true,
            if_false: Arc::new(NoOp),
        }
    }

    pub fn otherwise(mut self, if_false: Arc<dyn Step>) -> Self {
        self.if_false = if_false;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Step for Branch {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let start = Instant::now();
            let took_then = (self.condition)(&input);
            let (path, child) = if took_then {
                ("then", &self.if_true)
            } else {
                ("otherwise", &self.if_false)
            };
            debug!(branch = %self.name, path, step = %child.name(), "Branch taken");

            let child_result = child.execute(input, ctx).await?;

            let mut result = StepResult::new(child_result.output.clone());
            result.iteration_count = child_result.iteration_count;
            result.absorb(&child_result, "branch");
            result.duration = start.elapsed();
            result.set_metadata("branch.took_path", path);
            result.set_metadata("branch.duration", secs(result.duration));
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{predicate, AgentStep};
    use maestro_test_utils::MockAgent;

    fn arms() -> (Arc<MockAgent>, Arc<MockAgent>, Branch) {
        let yes = Arc::new(MockAgent::echo("yes"));
        let no = Arc::new(MockAgent::echo("no"));
        let branch = Branch::new(
            predicate(|s| s.contains("urgent")),
            Arc::new(AgentStep::new(yes.clone())),
        )
        .otherwise(Arc::new(AgentStep::new(no.clone())));
        (yes, no, branch)
    }

    #[tokio::test]
    async fn test_takes_then_path() {
        let (yes, no, branch) = arms();
        let result = branch
            .execute("urgent ticket".into(), RunContext::new("urgent ticket"))
            .await
            .unwrap();
        assert_eq!(result.output, "yes: urgent ticket");
        assert_eq!(result.metadata_str("branch.took_path"), Some("then"));
        assert_eq!(result.metadata_str("branch.agent"), Some("yes"));
        assert!(result.metadata.contains_key("branch.duration"));
        assert_eq!(yes.call_count(), 1);
        assert_eq!(no.call_count(), 0);
    }

    #[tokio::test]
    async fn test_takes_otherwise_path() {
        let (yes, no, branch) = arms();
        let result = branch
            .execute("routine".into(), RunContext::new("routine"))
            .await
            .unwrap();
        assert_eq!(result.output, "no: routine");
        assert_eq!(result.metadata_str("branch.took_path"), Some("otherwise"));
        assert_eq!(yes.call_count(), 0);
        assert_eq!(no.call_count(), 1);
    }

    #[tokio::test]
    async fn test_default_otherwise_is_noop() {
        let branch = Branch::new(
            predicate(|_| false),
            Arc::new(AgentStep::new(Arc::new(MockAgent::echo("never")))),
        );
        let result = branch.execute("keep".into(), RunContext::new("keep")).await.unwrap();
        assert_eq!(result.output, "keep");
    }
}
