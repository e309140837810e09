use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaestroError {
    // Construction defects
    #[error("DAG has no nodes")]
    EmptyDag,

    #[error("DAG node declared twice: {node}")]
    DuplicateNode { node: String },

    #[error("DAG node '{node}' depends on unknown node '{dependency}'")]
    MissingDependency { node: String, dependency: String },

    #[error("DAG dependency cycle among nodes: {}", nodes.join(", "))]
    DependencyCycle { nodes: Vec<String> },

    #[error("Config error: {0}")]
    InvalidConfig(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Control-flow outcomes
    #[error("Approval rejected for '{prompt}': {reason}")]
    ApprovalRejected { prompt: String, reason: String },

    #[error("Human approval required: {prompt}")]
    ApprovalRequired { prompt: String },

    #[error("Routing failed: {0}")]
    RoutingFailed(String),

    #[error("No candidate agents available")]
    NoCandidates,

    #[error("Routing selected unknown agent: {name}")]
    UnknownAgent { name: String },

    #[error("Handoff from {from} to {to} disabled by policy")]
    HandoffDisabled { from: String, to: String },

    // Execution failures
    #[error("Agent execution failed: {agent}: {message}")]
    AgentExecution { agent: String, message: String },

    #[error("DAG node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<MaestroError>,
    },

    #[error("Inference request failed: {0}")]
    Inference(String),

    // Infrastructure failures
    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Persistence
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("No checkpoint found for workflow: {workflow_id}")]
    CheckpointNotFound { workflow_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MaestroError {
    /// Timeouts and cancellation. Callers may retry these.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Cancelled => true,
            Self::NodeFailed { source, .. } => source.is_infrastructure(),
            _ => false,
        }
    }

    /// Expected outcomes of orchestration decisions (rejection, routing, policy).
    pub fn is_business_outcome(&self) -> bool {
        match self {
            Self::ApprovalRejected { .. }
            | Self::ApprovalRequired { .. }
            | Self::RoutingFailed(_)
            | Self::NoCandidates
            | Self::UnknownAgent { .. }
            | Self::HandoffDisabled { .. } => true,
            Self::NodeFailed { source, .. } => source.is_business_outcome(),
            _ => false,
        }
    }

    /// Errors raised while building a workflow, never during a run.
    pub fn is_construction_defect(&self) -> bool {
        matches!(
            self,
            Self::EmptyDag
                | Self::DuplicateNode { .. }
                | Self::MissingDependency { .. }
                | Self::DependencyCycle { .. }
                | Self::InvalidConfig(_)
        )
    }

    /// Strip `NodeFailed` wrappers to reach the error a node actually raised.
    pub fn root_cause(&self) -> &MaestroError {
        match self {
            Self::NodeFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: after.as_millis() as u64,
        }
    }
}

pub type Result<T> = std::result::Result<T, MaestroError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MaestroError::Cancelled.is_infrastructure());
        assert!(MaestroError::timeout("approval", std::time::Duration::from_secs(1)).is_infrastructure());
        assert!(!MaestroError::Cancelled.is_business_outcome());

        let rejected = MaestroError::ApprovalRejected {
            prompt: "ship it?".into(),
            reason: "no".into(),
        };
        assert!(rejected.is_business_outcome());
        assert!(!rejected.is_infrastructure());

        assert!(MaestroError::EmptyDag.is_construction_defect());
        assert!(MaestroError::DependencyCycle {
            nodes: vec!["a".into(), "b".into()]
        }
        .is_construction_defect());
    }

    #[test]
    fn test_node_failed_root_cause() {
        let err = MaestroError::NodeFailed {
            node: "fetch".into(),
            source: Box::new(MaestroError::Cancelled),
        };
        assert!(err.is_infrastructure());
        assert!(matches!(err.root_cause(), MaestroError::Cancelled));
        assert!(err.to_string().contains("fetch"));
    }

    #[test]
    fn test_cycle_message_lists_nodes() {
        let err = MaestroError::DependencyCycle {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "DAG dependency cycle among nodes: a, b");
    }
}
