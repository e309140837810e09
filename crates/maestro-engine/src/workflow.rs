use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use maestro_core::config::{CheckpointPolicy, MaestroConfig};
use maestro_core::error::{MaestroError, Result};
use maestro_core::event::EventBus;
use maestro_core::types::{OrchestrationEvent, StepResult};

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::context::RunContext;
use crate::resume::{InterruptReason, ResumeHandle, ResumeToken};
use crate::steps::{Sequence, Step};

/// A workflow that stopped early, with everything needed to continue it.
#[derive(Debug)]
pub struct Suspension {
    pub handle: ResumeHandle,
    /// Runs the remaining steps when resumed.
    pub token: ResumeToken,
}

#[derive(Debug)]
pub enum WorkflowOutcome {
    Completed(StepResult),
    Suspended(Suspension),
}

impl WorkflowOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn completed(self) -> Option<StepResult> {
        match self {
            Self::Completed(r) => Some(r),
            Self::Suspended(_) => None,
        }
    }

    pub fn suspended(self) -> Option<Suspension> {
        match self {
            Self::Suspended(s) => Some(s),
            Self::Completed(_) => None,
        }
    }
}

/// Checkpointed sequence of steps.
///
/// Progress is saved per the [`CheckpointPolicy`]. A step that needs human
/// approval, a cancelled context, or the workflow timeout suspends the run
/// instead of failing it.
pub struct Workflow {
    id: String,
    steps: Vec<Arc<dyn Step>>,
    store: Option<Arc<dyn CheckpointStore>>,
    policy: CheckpointPolicy,
    timeout: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            id: id.into(),
            steps,
            store: None,
            policy: CheckpointPolicy::default(),
            timeout: None,
            event_bus: None,
        }
    }

    /// Checkpoint policy and timeout from `[checkpoint]` and `[engine]`.
    pub fn with_config(mut self, config: &MaestroConfig) -> Self {
        self.policy = config.checkpoint.effective_policy();
        self.timeout = config.engine.workflow_timeout_secs.map(Duration::from_secs);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn publish(&self, event: OrchestrationEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    async fn checkpoint(&self, step_index: usize, output: &str, ctx: &RunContext) -> Result<CheckpointState> {
        let state = CheckpointState::new(self.id.clone(), step_index, output)
            .with_metadata(ctx.values().await);
        if let Some(store) = &self.store {
            store.save(state.clone()).await?;
            debug!(workflow_id = %self.id, step_index, "Checkpoint saved");
            self.publish(OrchestrationEvent::CheckpointSaved {
                workflow_id: self.id.clone(),
                step_index,
            });
        }
        Ok(state)
    }

    async fn suspend(
        &self,
        next: usize,
        output: String,
        reason: InterruptReason,
        ctx: &RunContext,
    ) -> Result<WorkflowOutcome> {
        warn!(workflow_id = %self.id, step_index = next, reason = %reason, "Workflow suspended");
        let checkpoint = self.checkpoint(next, &output, ctx).await?;
        self.publish(OrchestrationEvent::WorkflowSuspended {
            workflow_id: self.id.clone(),
            reason: reason.to_string(),
        });

        // A cancelled context would cancel the resumed steps immediately.
        let captured = if ctx.is_cancelled() {
            ctx.detach().await
        } else {
            ctx.clone()
        };
        let remaining: Vec<Arc<dyn Step>> = self.steps[next..].to_vec();
        let rest = Sequence::new(remaining).with_name(format!("{}[{}..]", self.id, next));
        let token = ResumeToken::new(
            format!("{}@{}", self.id, next),
            output,
            Arc::new(rest),
            captured,
        );

        Ok(WorkflowOutcome::Suspended(Suspension {
            handle: ResumeHandle {
                workflow_id: self.id.clone(),
                checkpoint,
                interrupt_reason: reason,
            },
            token,
        }))
    }

    async fn run_from(&self, start_index: usize, input: String, ctx: &RunContext) -> Result<WorkflowOutcome> {
        let start = Instant::now();
        let deadline = self.timeout.map(|t| start + t);
        let mut result = StepResult::new(input);
        info!(workflow_id = %self.id, start_index, steps = self.steps.len(), "Running workflow");

        for (index, step) in self.steps.iter().enumerate().skip(start_index) {
            if ctx.is_cancelled() {
                return self
                    .suspend(index, result.output, InterruptReason::ExternalInterrupt, ctx)
                    .await;
            }

            debug!(workflow_id = %self.id, index, step = %step.name(), "Running workflow step");
            let run = step.execute(result.output.clone(), ctx.clone());
            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return self
                            .suspend(index, result.output, InterruptReason::Timeout, ctx)
                            .await
                    }
                },
                None => run.await,
            };

            match outcome {
                Ok(child) => {
                    result.absorb(&child, &format!("workflow.step.{}", index));
                    result.iteration_count += child.iteration_count;
                    result.output = child.output;
                }
                Err(MaestroError::ApprovalRequired { prompt }) => {
                    return self
                        .suspend(
                            index + 1,
                            result.output,
                            InterruptReason::HumanApprovalRequired { prompt },
                            ctx,
                        )
                        .await;
                }
                Err(MaestroError::Cancelled) => {
                    return self
                        .suspend(index, result.output, InterruptReason::ExternalInterrupt, ctx)
                        .await;
                }
                Err(e) => {
                    warn!(workflow_id = %self.id, index, error = %e, "Workflow step failed");
                    return Err(e);
                }
            }

            let completed = index + 1;
            if completed < self.steps.len() && self.policy.should_checkpoint(completed) {
                self.checkpoint(completed, &result.output, ctx).await?;
            }
        }

        if let Some(store) = &self.store {
            store.clear(&self.id).await?;
        }

        result.duration = start.elapsed();
        result.set_metadata("workflow.id", self.id.clone());
        result.set_metadata("workflow.steps_completed", self.steps.len());
        if start_index > 0 {
            result.set_metadata("workflow.resumed_from", start_index);
        }
        info!(
            workflow_id = %self.id,
            elapsed_ms = result.duration.as_millis() as u64,
            "Workflow completed"
        );
        Ok(WorkflowOutcome::Completed(result))
    }

    /// Run every step from the beginning.
    pub async fn run(&self, input: impl Into<String>, ctx: &RunContext) -> Result<WorkflowOutcome> {
        self.run_from(0, input.into(), ctx).await
    }

    /// Continue from the workflow's latest checkpoint, restoring context values.
    pub async fn resume_from_checkpoint(&self, ctx: &RunContext) -> Result<WorkflowOutcome> {
        let store = self.store.as_ref().ok_or_else(|| {
            MaestroError::Checkpoint(format!("workflow '{}' has no checkpoint store", self.id))
        })?;
        let state = store
            .load(&self.id)
            .await?
            .ok_or_else(|| MaestroError::CheckpointNotFound {
                workflow_id: self.id.clone(),
            })?;

        info!(workflow_id = %self.id, step_index = state.step_index, "Resuming from checkpoint");
        ctx.extend_values(state.metadata).await;
        self.run_from(state.step_index, state.intermediate_output, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::steps::{AgentStep, HumanApproval};
    use maestro_core::config::UnattendedPolicy;
    use maestro_test_utils::{FailingAgent, MockAgent, SlowAgent};

    fn agent(name: &str) -> Arc<dyn Step> {
        Arc::new(AgentStep::new(Arc::new(MockAgent::echo(name))))
    }

    #[tokio::test]
    async fn test_completes_and_clears_checkpoints() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let wf = Workflow::new("wf", vec![agent("a"), agent("b"), agent("c")]).with_store(store.clone());

        let ctx = RunContext::new("in");
        let result = wf.run("in", &ctx).await.unwrap().completed().unwrap();
        assert_eq!(result.output, "c: b: a: in");
        assert_eq!(result.metadata_str("workflow.step.1.agent"), Some("b"));
        assert_eq!(result.metadata["workflow.steps_completed"], 3);
        assert!(store.load("wf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoints_follow_policy() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let wf = Workflow::new(
            "wf",
            vec![
                agent("a"),
                agent("b"),
                agent("c"),
                agent("d"),
                Arc::new(AgentStep::new(Arc::new(FailingAgent::new("e", "boom")))),
            ],
        )
        .with_store(store.clone())
        .with_policy(CheckpointPolicy::EveryNSteps(2));

        let err = wf.run("in", &RunContext::new("in")).await.unwrap_err();
        assert!(matches!(err, MaestroError::AgentExecution { .. }));

        let history = store.history("wf").await;
        assert_eq!(
            history.iter().map(|s| s.step_index).collect::<Vec<_>>(),
            vec![2, 4]
        );
        assert_eq!(history[1].intermediate_output, "d: c: b: a: in");
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint_restores_values() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut saved = CheckpointState::new("wf", 2, "partial");
        saved.metadata.insert("topic".into(), "rust".into());
        store.save(saved).await.unwrap();

        let c = Arc::new(MockAgent::echo("c"));
        let wf = Workflow::new(
            "wf",
            vec![agent("a"), agent("b"), Arc::new(AgentStep::new(c.clone()))],
        )
        .with_store(store.clone());

        let ctx = RunContext::new("ignored");
        let result = wf.resume_from_checkpoint(&ctx).await.unwrap().completed().unwrap();
        assert_eq!(result.output, "c: partial");
        assert_eq!(ctx.get_str("topic").await.as_deref(), Some("rust"));
        assert_eq!(ctx.execution_path().await, vec!["c"]);
        assert_eq!(result.metadata["workflow.resumed_from"], 2);
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint() {
        let wf = Workflow::new("wf", vec![agent("a")])
            .with_store(Arc::new(MemoryCheckpointStore::new()));
        let err = wf.resume_from_checkpoint(&RunContext::new("x")).await.unwrap_err();
        assert!(matches!(err, MaestroError::CheckpointNotFound { .. }));

        let no_store = Workflow::new("wf", vec![agent("a")]);
        assert!(no_store.resume_from_checkpoint(&RunContext::new("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_approval_required_suspends_after_step() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let wf = Workflow::new(
            "publish",
            vec![
                agent("writer"),
                Arc::new(HumanApproval::new("publish?").with_unattended(UnattendedPolicy::Suspend)),
                agent("publisher"),
            ],
        )
        .with_store(store.clone())
        .with_policy(CheckpointPolicy::Disabled)
        .with_event_bus(bus);

        let ctx = RunContext::new("post");
        let suspension = wf.run("post", &ctx).await.unwrap().suspended().unwrap();
        assert_eq!(
            suspension.handle.interrupt_reason,
            InterruptReason::HumanApprovalRequired {
                prompt: "publish?".into()
            }
        );
        assert_eq!(suspension.handle.checkpoint.step_index, 2);
        assert_eq!(suspension.handle.checkpoint.intermediate_output, "writer: post");
        // Suspension checkpoints even with the policy disabled.
        assert_eq!(store.load("publish").await.unwrap().unwrap().step_index, 2);
        assert!(matches!(
            rx.recv().await.unwrap(),
            OrchestrationEvent::CheckpointSaved { step_index: 2, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            OrchestrationEvent::WorkflowSuspended { .. }
        ));

        let result = suspension.token.resume("approved post".into()).await.unwrap();
        assert_eq!(result.output, "publisher: approved post");
        assert_eq!(ctx.execution_path().await, vec!["writer", "publisher"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_suspends_at_step() {
        let wf = Workflow::new(
            "slow",
            vec![
                agent("fast"),
                Arc::new(AgentStep::new(Arc::new(SlowAgent::new("slow", Duration::from_secs(60))))),
            ],
        )
        .with_store(Arc::new(MemoryCheckpointStore::new()))
        .with_timeout(Duration::from_secs(10));

        let suspension = wf
            .run("in", &RunContext::new("in"))
            .await
            .unwrap()
            .suspended()
            .unwrap();
        assert_eq!(suspension.handle.interrupt_reason, InterruptReason::Timeout);
        assert_eq!(suspension.handle.checkpoint.step_index, 1);
        assert_eq!(suspension.token.captured_input(), "fast: in");
        suspension.token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_suspends_and_token_survives_it() {
        let wf = Workflow::new(
            "wf",
            vec![
                agent("first"),
                Arc::new(AgentStep::new(Arc::new(SlowAgent::new("slow", Duration::from_secs(60))))),
            ],
        );

        let ctx = RunContext::new("in");
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let suspension = wf.run("in", &ctx).await.unwrap().suspended().unwrap();
        assert_eq!(suspension.handle.interrupt_reason, InterruptReason::ExternalInterrupt);
        assert_eq!(suspension.handle.checkpoint.step_index, 1);

        let result = suspension.token.resume("first: in".into()).await.unwrap();
        assert_eq!(result.output, "slow: first: in");
    }

    #[test]
    fn test_with_config() {
        let config = MaestroConfig::parse(
            "[engine]\nworkflow_timeout_secs = 30\n[checkpoint]\nenabled = false\n",
        )
        .unwrap();
        let wf = Workflow::new("wf", vec![agent("a")]).with_config(&config);
        assert_eq!(wf.policy, CheckpointPolicy::Disabled);
        assert_eq!(wf.timeout, Some(Duration::from_secs(30)));
    }
}
