use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dynamically typed value stored in contexts, metadata, and checkpoints.
pub type DynamicValue = serde_json::Value;

/// Metadata attached to results and checkpoints.
pub type Metadata = HashMap<String, DynamicValue>;

/// Unique session identifier handed to agents.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message recorded in a run's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Agent or step that produced the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            author: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            author: Some(author.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            author: None,
            timestamp: Utc::now(),
        }
    }
}

/// A tool invocation requested by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Token accounting reported by an agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Outcome of executing a step or an agent.
///
/// Composite steps build theirs by absorbing child results; child metadata
/// keys are re-tagged with the composite's prefix so they never collide.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub output: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub iteration_count: usize,
    pub duration: Duration,
    pub token_usage: Option<TokenUsage>,
    pub metadata: Metadata,
}

impl StepResult {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<DynamicValue>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Fold a child's tool activity, token usage, and metadata into this result.
    ///
    /// Child metadata keys become `{prefix}.{key}`. The output is left untouched.
    pub fn absorb(&mut self, child: &StepResult, prefix: &str) {
        self.tool_calls.extend(child.tool_calls.iter().cloned());
        self.tool_results.extend(child.tool_results.iter().cloned());
        if let Some(usage) = &child.token_usage {
            self.token_usage.get_or_insert_with(TokenUsage::default).add(usage);
        }
        for (key, value) in &child.metadata {
            self.metadata.insert(format!("{}.{}", prefix, key), value.clone());
        }
    }
}

/// Event emitted while an agent streams its work.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Text chunk from the agent.
    TextDelta(String),
    /// Tool execution started.
    ToolStart(ToolCall),
    /// Tool execution finished.
    ToolEnd(ToolResult),
    /// Supervisor is handing the request to an agent.
    HandoffStarted { from: String, to: String },
    /// The agent that received a handoff finished.
    HandoffCompleted { from: String, to: String },
    /// Final result of the run.
    Completed(StepResult),
    /// The run failed.
    Failed { error: String },
}

/// Request presented to a human approver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub prompt: String,
    pub current_output: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(prompt: impl Into<String>, current_output: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            current_output: current_output.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Decision returned by an approver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalResponse {
    Approved,
    Rejected { reason: String },
    Modified { new_input: String },
}

impl ApprovalResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected { .. } => "rejected",
            Self::Modified { .. } => "modified",
        }
    }
}

/// Engine-level event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    /// A human approval was requested.
    ApprovalRequested { request: ApprovalRequest },
    /// A pending approval was answered.
    ApprovalResolved { request_id: String, response: &'static str },
    /// The supervisor delegated to an agent.
    Handoff { from: String, to: String },
    /// A workflow checkpoint was persisted.
    CheckpointSaved { workflow_id: String, step_index: usize },
    /// A workflow stopped and handed back a resume token.
    WorkflowSuspended { workflow_id: String, reason: String },
}
