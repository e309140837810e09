//! Routing strategies: pick one candidate agent for an input.

pub mod keyword;
pub mod model;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use maestro_core::error::Result;

use crate::context::RunContext;

pub use keyword::KeywordStrategy;
pub use model::ModelStrategy;

/// Describes a candidate's capabilities for routing decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDescription {
    /// Unique within a supervisor's registry.
    pub name: String,
    /// Human-readable summary of what the agent does.
    #[serde(default)]
    pub description: String,
    /// Short capability phrases (e.g. "unit conversion").
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Words that strongly suggest this agent.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AgentDescription {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of a routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected_name: String,
    /// Within [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl RoutingDecision {
    pub fn new(selected_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            selected_name: selected_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Policy for selecting one candidate given an input.
pub trait RoutingStrategy: Send + Sync + 'static {
    /// Strategy name for logs and metadata.
    fn name(&self) -> &str;

    fn select_agent<'a>(
        &'a self,
        input: &'a str,
        candidates: &'a [AgentDescription],
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<RoutingDecision>>;
}
