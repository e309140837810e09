use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};

use crate::error::Result;
use crate::types::*;

/// Callbacks fired around agent runs and handoffs.
pub trait RunHooks: Send + Sync + 'static {
    fn on_agent_start(&self, agent: &str, input: &str) {
        let _ = (agent, input);
    }

    fn on_agent_end(&self, agent: &str, result: &StepResult) {
        let _ = (agent, result);
    }

    fn on_handoff(&self, from: &str, to: &str) {
        let _ = (from, to);
    }
}

/// Agent: anything that turns an input into a result (LLM loop, tool chain, nested framework).
pub trait AgentHandle: Send + Sync + 'static {
    /// Agent name (used for routing and the execution path).
    fn name(&self) -> &str;

    /// Run the agent to completion.
    fn run(
        &self,
        input: String,
        session: Option<SessionId>,
        hooks: Option<Arc<dyn RunHooks>>,
    ) -> BoxFuture<'_, Result<StepResult>>;

    /// Run the agent and receive its events as a stream.
    ///
    /// The default runs to completion and yields a single `Completed` event.
    fn stream(
        &self,
        input: String,
        session: Option<SessionId>,
    ) -> BoxFuture<'_, Result<BoxStream<'static, Result<AgentEvent>>>> {
        Box::pin(async move {
            let result = self.run(input, session, None).await?;
            let events: BoxStream<'static, Result<AgentEvent>> =
                Box::pin(stream::iter(vec![Ok(AgentEvent::Completed(result))]));
            Ok(events)
        })
    }
}

/// Inference provider: prompt in, text out. Used for model-driven routing.
pub trait InferenceProvider: Send + Sync + 'static {
    fn generate(&self, prompt: String) -> BoxFuture<'_, Result<String>>;
}

/// Approval handler: asks a human (or policy) to decide on a pending step.
pub trait ApprovalHandler: Send + Sync + 'static {
    fn request_approval(&self, request: ApprovalRequest) -> BoxFuture<'_, Result<ApprovalResponse>>;
}
