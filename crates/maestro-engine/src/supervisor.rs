use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use maestro_core::error::{MaestroError, Result};
use maestro_core::event::EventBus;
use maestro_core::traits::{AgentHandle, RunHooks};
use maestro_core::types::{AgentEvent, Message, OrchestrationEvent, StepResult};

use crate::context::RunContext;
use crate::routing::{AgentDescription, RoutingDecision, RoutingStrategy};
use crate::steps::Step;

/// Rewrites the input handed to the selected agent.
pub type InputFilter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Decides whether a handoff `from -> to` may proceed.
pub type HandoffCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Optional behavior applied whenever the supervisor delegates.
#[derive(Clone, Default)]
pub struct HandoffConfig {
    pub input_filter: Option<InputFilter>,
    pub is_enabled: Option<HandoffCheck>,
    pub hooks: Option<Arc<dyn RunHooks>>,
    pub event_bus: Option<Arc<EventBus>>,
}

impl HandoffConfig {
    pub fn with_input_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.input_filter = Some(Arc::new(f));
        self
    }

    pub fn with_enabled_check<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.is_enabled = Some(Arc::new(f));
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RunHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }
}

struct Candidate {
    handle: Arc<dyn AgentHandle>,
    description: AgentDescription,
}

/// Selects one registered agent per request and delegates to it.
///
/// An unknown selection or a failing agent falls back to the configured
/// fallback agent, when there is one. Cancellation and disabled handoffs
/// are never retried on the fallback.
pub struct Supervisor {
    name: String,
    candidates: Vec<Candidate>,
    descriptions: Vec<AgentDescription>,
    strategy: Arc<dyn RoutingStrategy>,
    fallback: Option<Arc<dyn AgentHandle>>,
    handoff: HandoffConfig,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, strategy: Arc<dyn RoutingStrategy>) -> Self {
        Self {
            name: name.into(),
            candidates: vec![],
            descriptions: vec![],
            strategy,
            fallback: None,
            handoff: HandoffConfig::default(),
        }
    }

    /// Register a candidate. The description's name is the routing key.
    pub fn register(mut self, handle: Arc<dyn AgentHandle>, description: AgentDescription) -> Self {
        self.descriptions.push(description.clone());
        self.candidates.push(Candidate { handle, description });
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn AgentHandle>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_handoff(mut self, handoff: HandoffConfig) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn candidates(&self) -> &[AgentDescription] {
        &self.descriptions
    }

    fn lookup(&self, name: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.description.name == name)
    }

    /// Pick a target for `input`. A single candidate is chosen without consulting the strategy.
    pub async fn route(&self, input: &str, ctx: &RunContext) -> Result<RoutingDecision> {
        match self.descriptions.as_slice() {
            [] => Err(MaestroError::NoCandidates),
            [only] => Ok(RoutingDecision::new(only.name.clone(), 1.0)
                .with_reasoning("only one candidate registered")),
            all => {
                let decision = self.strategy.select_agent(input, all, ctx).await?;
                if decision.selected_name.trim().is_empty() {
                    return Err(MaestroError::RoutingFailed(format!(
                        "strategy '{}' selected no agent",
                        self.strategy.name()
                    )));
                }
                Ok(decision)
            }
        }
    }

    /// Enablement check, path log, hook, and event for a handoff to `to`.
    async fn begin_handoff(&self, to: &str, ctx: &RunContext) -> Result<()> {
        if let Some(check) = &self.handoff.is_enabled {
            if !check(&self.name, to) {
                warn!(from = %self.name, to = %to, "Handoff disabled by policy");
                return Err(MaestroError::HandoffDisabled {
                    from: self.name.clone(),
                    to: to.to_string(),
                });
            }
        }
        ctx.record_execution(to).await;
        if let Some(hooks) = &self.handoff.hooks {
            hooks.on_handoff(&self.name, to);
        }
        if let Some(bus) = &self.handoff.event_bus {
            bus.publish(OrchestrationEvent::Handoff {
                from: self.name.clone(),
                to: to.to_string(),
            });
        }
        info!(from = %self.name, to = %to, "Handing off");
        Ok(())
    }

    fn filter_input(&self, input: &str) -> String {
        match &self.handoff.input_filter {
            Some(filter) => filter(input),
            None => input.to_string(),
        }
    }

    async fn run_target(
        &self,
        handle: &Arc<dyn AgentHandle>,
        input: &str,
        ctx: &RunContext,
    ) -> Result<StepResult> {
        let run = handle.run(self.filter_input(input), None, self.handoff.hooks.clone());
        tokio::select! {
            res = run => res,
            _ = ctx.cancelled() => Err(MaestroError::Cancelled),
        }
    }

    /// Run the fallback in place of a failed selection, or return `cause` if there is none.
    async fn fall_back(
        &self,
        input: &str,
        ctx: &RunContext,
        tag: &'static str,
        cause: MaestroError,
        decision: Option<&RoutingDecision>,
    ) -> Result<StepResult> {
        let Some(fallback) = &self.fallback else {
            return Err(cause);
        };
        warn!(
            supervisor = %self.name,
            fallback = %fallback.name(),
            reason = %cause,
            "Falling back"
        );

        self.begin_handoff(fallback.name(), ctx).await?;
        let mut result = self.run_target(fallback, input, ctx).await?;
        ctx.add_message(Message::assistant(fallback.name(), result.output.clone()))
            .await;

        result.set_metadata("routing_decision", tag);
        result.set_metadata("supervisor.fallback_agent", fallback.name());
        result.set_metadata("supervisor.fallback_reason", cause.to_string());
        if let Some(decision) = decision {
            result.set_metadata("supervisor.selected_agent", decision.selected_name.clone());
            result.set_metadata("supervisor.confidence", decision.confidence);
        }
        Ok(result)
    }

    /// Route `input`, delegate to the selected agent, and annotate the result.
    pub async fn run_with_context(&self, input: &str, ctx: &RunContext) -> Result<StepResult> {
        let start = Instant::now();
        let decision = match self.route(input, ctx).await {
            Ok(d) => d,
            Err(e) if e.is_infrastructure() => return Err(e),
            Err(e) => {
                return self
                    .fall_back(input, ctx, "fallback_after_routing_error", e, None)
                    .await
            }
        };
        debug!(
            supervisor = %self.name,
            selected = %decision.selected_name,
            confidence = decision.confidence,
            "Routing decision"
        );

        let Some(candidate) = self.lookup(&decision.selected_name) else {
            let cause = MaestroError::UnknownAgent {
                name: decision.selected_name.clone(),
            };
            return self
                .fall_back(input, ctx, "fallback_unknown_agent", cause, Some(&decision))
                .await;
        };

        self.begin_handoff(&candidate.description.name, ctx).await?;
        let mut result = match self.run_target(&candidate.handle, input, ctx).await {
            Ok(r) => r,
            Err(e) if e.is_infrastructure() => return Err(e),
            Err(e) => {
                return self
                    .fall_back(input, ctx, "fallback_after_error", e, Some(&decision))
                    .await
            }
        };
        ctx.add_message(Message::assistant(
            candidate.description.name.clone(),
            result.output.clone(),
        ))
        .await;

        if result.duration.is_zero() {
            result.duration = start.elapsed();
        }
        result.set_metadata("routing_decision", "routed");
        result.set_metadata("supervisor.strategy", self.strategy.name());
        result.set_metadata("supervisor.selected_agent", decision.selected_name.clone());
        result.set_metadata("supervisor.confidence", decision.confidence);
        if let Some(reasoning) = &decision.reasoning {
            result.set_metadata("supervisor.reasoning", reasoning.clone());
        }
        Ok(result)
    }

    /// Route and delegate with a fresh context.
    pub async fn run(&self, input: &str) -> Result<StepResult> {
        let ctx = RunContext::new(input);
        self.run_with_context(input, &ctx).await
    }

    /// Open `handle`'s event stream, racing cancellation.
    async fn open_stream(
        &self,
        handle: &Arc<dyn AgentHandle>,
        input: &str,
        ctx: &RunContext,
    ) -> Result<BoxStream<'static, Result<AgentEvent>>> {
        let open = handle.stream(self.filter_input(input), None);
        tokio::select! {
            res = open => res,
            _ = ctx.cancelled() => Err(MaestroError::Cancelled),
        }
    }

    /// Surround `inner` with handoff markers and log the completed output to `ctx`.
    fn wrap_stream(
        &self,
        to: &str,
        inner: BoxStream<'static, Result<AgentEvent>>,
        ctx: &RunContext,
    ) -> BoxStream<'static, Result<AgentEvent>> {
        let started = AgentEvent::HandoffStarted {
            from: self.name.clone(),
            to: to.to_string(),
        };
        let completed = AgentEvent::HandoffCompleted {
            from: self.name.clone(),
            to: to.to_string(),
        };
        let ctx = ctx.clone();
        let author = to.to_string();
        let inner = inner.then(move |event| {
            let ctx = ctx.clone();
            let author = author.clone();
            async move {
                if let Ok(AgentEvent::Completed(result)) = &event {
                    ctx.add_message(Message::assistant(author, result.output.clone()))
                        .await;
                }
                event
            }
        });
        stream::iter(vec![Ok(started)])
            .chain(inner)
            .chain(stream::iter(vec![Ok(completed)]))
            .boxed()
    }

    /// Stream from the fallback in place of a failed selection, or return `cause`.
    async fn stream_fallback(
        &self,
        input: &str,
        ctx: &RunContext,
        cause: MaestroError,
    ) -> Result<BoxStream<'static, Result<AgentEvent>>> {
        let Some(fallback) = &self.fallback else {
            return Err(cause);
        };
        warn!(
            supervisor = %self.name,
            fallback = %fallback.name(),
            reason = %cause,
            "Falling back (stream)"
        );
        self.begin_handoff(fallback.name(), ctx).await?;
        let inner = self.open_stream(fallback, input, ctx).await?;
        Ok(self.wrap_stream(fallback.name(), inner, ctx))
    }

    /// Route and forward the target's own event stream between handoff markers.
    ///
    /// Falls back under the same rules as [`run_with_context`](Self::run_with_context).
    pub async fn stream(
        &self,
        input: &str,
        ctx: &RunContext,
    ) -> Result<BoxStream<'static, Result<AgentEvent>>> {
        let decision = match self.route(input, ctx).await {
            Ok(d) => d,
            Err(e) if e.is_infrastructure() => return Err(e),
            Err(e) => return self.stream_fallback(input, ctx, e).await,
        };
        let Some(candidate) = self.lookup(&decision.selected_name) else {
            let cause = MaestroError::UnknownAgent {
                name: decision.selected_name,
            };
            return self.stream_fallback(input, ctx, cause).await;
        };

        let to = candidate.description.name.clone();
        self.begin_handoff(&to, ctx).await?;
        match self.open_stream(&candidate.handle, input, ctx).await {
            Ok(inner) => Ok(self.wrap_stream(&to, inner, ctx)),
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => self.stream_fallback(input, ctx, e).await,
        }
    }
}

impl Step for Supervisor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move { self.run_with_context(&input, &ctx).await })
    }
}
