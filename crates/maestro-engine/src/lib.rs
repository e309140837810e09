//! Maestro orchestration engine.
//!
//! Workflows are trees of [`Step`]s sharing one [`RunContext`]. Composite
//! steps (sequence, branch, bounded loop, DAG) run their children and merge
//! the results; a [`Supervisor`] instead picks one agent per request. A
//! [`Workflow`] adds checkpointing and suspension on top of a plain sequence.

pub mod approval;
pub mod checkpoint;
pub mod context;
pub mod graph;
pub mod resume;
pub mod routing;
pub mod steps;
pub mod supervisor;
pub mod workflow;

pub use approval::ApprovalBroker;
pub use checkpoint::{
    CheckpointPolicy, CheckpointState, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use context::{ContextSnapshot, RunContext};
pub use graph::{DagNode, DagReport, DagStep, NodeResult};
pub use resume::{InterruptReason, ResumeHandle, ResumeToken};
pub use routing::{AgentDescription, KeywordStrategy, ModelStrategy, RoutingDecision, RoutingStrategy};
pub use steps::{predicate, AgentStep, Branch, HumanApproval, NoOp, Predicate, RepeatWhile, Sequence, Step};
pub use supervisor::{HandoffConfig, Supervisor};
pub use workflow::{Suspension, Workflow, WorkflowOutcome};
