use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use maestro_core::error::{MaestroError, Result};
use maestro_core::traits::{AgentHandle, RunHooks};
use maestro_core::types::{Message, SessionId, StepResult};

use super::Step;
use crate::context::RunContext;

/// Delegates to an external agent.
pub struct AgentStep {
    name: String,
    target: Arc<dyn AgentHandle>,
    session: Option<SessionId>,
    hooks: Option<Arc<dyn RunHooks>>,
}

impl AgentStep {
    /// Step named after the agent it wraps.
    pub fn new(target: Arc<dyn AgentHandle>) -> Self {
        Self {
            name: target.name().to_string(),
            target,
            session: None,
            hooks: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Reuse one agent session across every execution of this step.
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RunHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

impl Step for AgentStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let start = Instant::now();
            ctx.record_execution(self.target.name()).await;
            ctx.add_message(Message::user(input.clone())).await;

            if let Some(hooks) = &self.hooks {
                hooks.on_agent_start(self.target.name(), &input);
            }

            debug!(step = %self.name, agent = %self.target.name(), "Running agent step");
            let run = self
                .target
                .run(input, self.session.clone(), self.hooks.clone());

            let mut result = tokio::select! {
                res = run => res,
                _ = ctx.cancelled() => {
                    warn!(step = %self.name, "Agent step cancelled");
                    Err(MaestroError::Cancelled)
                }
            }?;

            if result.duration.is_zero() {
                result.duration = start.elapsed();
            }
            if result.iteration_count == 0 {
                result.iteration_count = 1;
            }
            result.set_metadata("agent", self.target.name());

            if let Some(hooks) = &self.hooks {
                hooks.on_agent_end(self.target.name(), &result);
            }
            ctx.add_message(Message::assistant(self.target.name(), result.output.clone()))
                .await;

            info!(
                step = %self.name,
                elapsed_ms = result.duration.as_millis() as u64,
                "Agent step completed"
            );
            Ok(result)
        })
    }
}

/// Passes its input through unchanged. The default "otherwise" arm of a [`Branch`](super::Branch).
#[derive(Debug, Clone, Default)]
pub struct NoOp;

impl Step for NoOp {
    fn name(&self) -> &str {
        "noop"
    }

    fn execute(&self, input: String, _ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move { Ok(StepResult::new(input)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_test_utils::{FailingAgent, MockAgent, RecordingHooks, SlowAgent};
    use std::time::Duration;

    #[tokio::test]
    async fn test_noop_passthrough() {
        let ctx = RunContext::new("x");
        let result = NoOp.execute("unchanged".into(), ctx.clone()).await.unwrap();
        assert_eq!(result.output, "unchanged");
        assert!(result.metadata.is_empty());
        assert!(ctx.execution_path().await.is_empty());
    }

    #[tokio::test]
    async fn test_agent_step_records_path_and_messages() {
        let step = AgentStep::new(Arc::new(MockAgent::echo("writer")));
        let ctx = RunContext::new("draft");

        let result = step.execute("draft".into(), ctx.clone()).await.unwrap();
        assert_eq!(result.output, "writer: draft");
        assert_eq!(result.metadata_str("agent"), Some("writer"));
        assert_eq!(result.iteration_count, 1);
        assert_eq!(ctx.execution_path().await, vec!["writer"]);

        let messages = ctx.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].author.as_deref(), Some("writer"));
    }

    #[tokio::test]
    async fn test_agent_step_propagates_failure() {
        let step = AgentStep::new(Arc::new(FailingAgent::new("broken", "boom")));
        let err = step
            .execute("x".into(), RunContext::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MaestroError::AgentExecution { ref agent, .. } if agent == "broken"));
    }

    #[tokio::test]
    async fn test_agent_step_fires_hooks() {
        let hooks = Arc::new(RecordingHooks::default());
        let step = AgentStep::new(Arc::new(MockAgent::echo("a"))).with_hooks(hooks.clone());
        step.execute("hi".into(), RunContext::new("hi")).await.unwrap();
        assert_eq!(hooks.events(), vec!["start:a", "end:a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_step_observes_cancellation() {
        let step = AgentStep::new(Arc::new(SlowAgent::new("slow", Duration::from_secs(60))));
        let ctx = RunContext::new("x");

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = step.execute("x".into(), ctx).await.unwrap_err();
        assert!(matches!(err, MaestroError::Cancelled));
        assert!(err.is_infrastructure());
    }
}
