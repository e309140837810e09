//! Step variants: the composable units a workflow is built from.
//!
//! Every variant implements [`Step`]. Composite steps hold their children
//! as `Arc<dyn Step>`, so one tree can be shared across runs.

pub mod agent;
pub mod approval;
pub mod branch;
pub mod repeat;
pub mod sequence;

use std::sync::Arc;

use futures::future::BoxFuture;

use maestro_core::error::Result;
use maestro_core::types::StepResult;

use crate::context::RunContext;

pub use agent::{AgentStep, NoOp};
pub use approval::HumanApproval;
pub use branch::Branch;
pub use repeat::RepeatWhile;
pub use sequence::Sequence;

/// Condition evaluated against a step's current text.
pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn predicate<F>(f: F) -> Predicate
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An executable unit of a workflow.
pub trait Step: Send + Sync + 'static {
    /// Name used in logs, metadata keys, and checkpoints.
    fn name(&self) -> &str;

    /// Run the step against `input`, reading and writing shared state through `ctx`.
    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>>;
}

/// Seconds as a float, the unit every `*.duration` metadata key uses.
pub(crate) fn secs(d: std::time::Duration) -> f64 {
    d.as_secs_f64()
}
