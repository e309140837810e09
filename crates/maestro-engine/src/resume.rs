use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use maestro_core::error::Result;
use maestro_core::types::StepResult;

use crate::checkpoint::CheckpointState;
use crate::context::RunContext;
use crate::steps::Step;

/// Why a workflow stopped before finishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InterruptReason {
    HumanApprovalRequired { prompt: String },
    ExternalInterrupt,
    Timeout,
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HumanApprovalRequired { prompt } => write!(f, "humanApprovalRequired({})", prompt),
            Self::ExternalInterrupt => write!(f, "externalInterrupt"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Where a suspended workflow stopped and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeHandle {
    pub workflow_id: String,
    pub checkpoint: CheckpointState,
    pub interrupt_reason: InterruptReason,
}

/// Single-use capability to continue a suspended run.
///
/// Both [`resume`](Self::resume) and [`cancel`](Self::cancel) take the token
/// by value, so a second call does not compile:
///
/// ```compile_fail
/// # use std::sync::Arc;
/// # use maestro_engine::{context::RunContext, resume::ResumeToken, steps::NoOp};
/// # async fn demo() {
/// let token = ResumeToken::new("after_review", "draft", Arc::new(NoOp), RunContext::new("draft"));
/// let _ = token.resume("approved draft".into()).await;
/// let _ = token.resume("again".into()).await; // use of moved value
/// # }
/// ```
///
/// A token dropped without either call is logged.
pub struct ResumeToken {
    id: Uuid,
    suspension_point: String,
    captured_input: String,
    captured_step: Arc<dyn Step>,
    captured_context: RunContext,
    consumed: bool,
}

impl ResumeToken {
    pub fn new(
        suspension_point: impl Into<String>,
        captured_input: impl Into<String>,
        captured_step: Arc<dyn Step>,
        captured_context: RunContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            suspension_point: suspension_point.into(),
            captured_input: captured_input.into(),
            captured_step,
            captured_context,
            consumed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn suspension_point(&self) -> &str {
        &self.suspension_point
    }

    /// Input the captured step would have received had the run continued.
    pub fn captured_input(&self) -> &str {
        &self.captured_input
    }

    pub fn context(&self) -> &RunContext {
        &self.captured_context
    }

    /// Run the captured step on `new_input` with the captured context.
    pub async fn resume(mut self, new_input: String) -> Result<StepResult> {
        self.consumed = true;
        info!(token = %self.id, point = %self.suspension_point, "Resuming suspended run");
        let step = self.captured_step.clone();
        let ctx = self.captured_context.clone();
        step.execute(new_input, ctx).await
    }

    /// Discard the suspended run.
    pub fn cancel(mut self) {
        self.consumed = true;
        debug!(token = %self.id, point = %self.suspension_point, "Resume token cancelled");
    }
}

impl Drop for ResumeToken {
    fn drop(&mut self) {
        if !self.consumed {
            warn!(
                token = %self.id,
                point = %self.suspension_point,
                "Resume token dropped without resume or cancel"
            );
        }
    }
}

impl std::fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeToken")
            .field("id", &self.id)
            .field("suspension_point", &self.suspension_point)
            .field("step", &self.captured_step.name())
            .finish()
    }
}
