use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{info, warn};

use maestro_core::config::{ApprovalConfig, UnattendedPolicy};
use maestro_core::error::{MaestroError, Result};
use maestro_core::traits::ApprovalHandler;
use maestro_core::types::{ApprovalRequest, ApprovalResponse, StepResult};

use super::{secs, Step};
use crate::context::RunContext;

/// Suspends the run until an external approver decides.
///
/// With a timeout, the handler races a timer and the loser is dropped.
/// Without a handler, the [`UnattendedPolicy`] decides.
pub struct HumanApproval {
    prompt: String,
    timeout: Option<Duration>,
    handler: Option<Arc<dyn ApprovalHandler>>,
    unattended: UnattendedPolicy,
}

impl HumanApproval {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            timeout: None,
            handler: None,
            unattended: UnattendedPolicy::default(),
        }
    }

    /// Timeout and unattended policy taken from the `[approval]` section.
    pub fn from_config(prompt: impl Into<String>, config: &ApprovalConfig) -> Self {
        Self {
            prompt: prompt.into(),
            timeout: config.timeout_secs.map(Duration::from_secs),
            handler: None,
            unattended: config.unattended,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_unattended(mut self, policy: UnattendedPolicy) -> Self {
        self.unattended = policy;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn unattended_outcome(&self, input: String) -> Result<StepResult> {
        match self.unattended {
            UnattendedPolicy::AutoApprove => {
                warn!(prompt = %self.prompt, "No approval handler configured, auto-approving");
                Ok(StepResult::new(input)
                    .with_metadata("approval.response", ApprovalResponse::Approved.kind())
                    .with_metadata("approval.policy", self.unattended.as_str())
                    .with_metadata("approval.wait_duration", 0.0))
            }
            UnattendedPolicy::Reject => {
                warn!(prompt = %self.prompt, "No approval handler configured, rejecting");
                Err(MaestroError::ApprovalRejected {
                    prompt: self.prompt.clone(),
                    reason: "no approval handler configured".into(),
                })
            }
            UnattendedPolicy::Suspend => Err(MaestroError::ApprovalRequired {
                prompt: self.prompt.clone(),
            }),
        }
    }
}

impl Step for HumanApproval {
    fn name(&self) -> &str {
        "human_approval"
    }

    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let Some(handler) = &self.handler else {
                return self.unattended_outcome(input);
            };

            let mut request = ApprovalRequest::new(self.prompt.clone(), input.clone());
            request
                .metadata
                .insert("execution_id".into(), ctx.execution_id().to_string().into());
            request
                .metadata
                .insert("execution_path".into(), ctx.execution_path().await.into());
            info!(request_id = %request.id, prompt = %self.prompt, "Requesting human approval");

            let start = Instant::now();
            let timer = async {
                match self.timeout {
                    Some(t) => tokio::time::sleep(t).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let response = tokio::select! {
                res = handler.request_approval(request) => res?,
                _ = timer => {
                    let after = self.timeout.unwrap_or_default();
                    warn!(prompt = %self.prompt, timeout_ms = after.as_millis() as u64, "Approval timed out");
                    return Err(MaestroError::timeout(format!("approval '{}'", self.prompt), after));
                }
                _ = ctx.cancelled() => return Err(MaestroError::Cancelled),
            };
            let waited = start.elapsed();
            let kind = response.kind();

            info!(prompt = %self.prompt, response = kind, "Approval resolved");
            let output = match response {
                ApprovalResponse::Approved => input,
                ApprovalResponse::Modified { new_input } => new_input,
                ApprovalResponse::Rejected { reason } => {
                    return Err(MaestroError::ApprovalRejected {
                        prompt: self.prompt.clone(),
                        reason,
                    });
                }
            };

            Ok(StepResult::new(output)
                .with_duration(waited)
                .with_metadata("approval.response", kind)
                .with_metadata("approval.wait_duration", secs(waited)))
        })
    }
}
