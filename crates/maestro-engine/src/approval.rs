use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use maestro_core::error::{MaestroError, Result};
use maestro_core::event::EventBus;
use maestro_core::traits::ApprovalHandler;
use maestro_core::types::{ApprovalRequest, ApprovalResponse, OrchestrationEvent};

/// Manages pending approval requests with oneshot channels.
///
/// A `HumanApproval` step awaiting the broker parks until another task
/// (REPL, web handler, chat bot) calls [`respond`](Self::respond).
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, (ApprovalRequest, oneshot::Sender<ApprovalResponse>)>>,
    event_bus: Arc<EventBus>,
}

/// Removes the pending entry if the waiting step is dropped first.
struct PendingGuard<'a> {
    broker: &'a ApprovalBroker,
    id: String,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // try_lock: Drop cannot await. A contended lock means a respond() is
        // in progress, which removes the entry itself.
        if let Ok(mut pending) = self.broker.pending.try_lock() {
            if pending.remove(&self.id).is_some() {
                debug!(request_id = %self.id, "Approval wait abandoned");
            }
        }
    }
}

impl ApprovalBroker {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            event_bus,
        }
    }

    /// Create an approval request, publish event, return receiver to await.
    pub async fn request(&self, req: ApprovalRequest) -> oneshot::Receiver<ApprovalResponse> {
        let (tx, rx) = oneshot::channel();
        let event = OrchestrationEvent::ApprovalRequested {
            request: req.clone(),
        };

        // Register before publishing: a subscriber may respond immediately.
        self.pending.lock().await.insert(req.id.clone(), (req, tx));
        self.event_bus.publish(event);
        rx
    }

    /// Respond to a pending approval.
    /// Returns true if the request was found and resolved.
    pub async fn respond(&self, request_id: &str, response: ApprovalResponse) -> bool {
        let entry = self.pending.lock().await.remove(request_id);
        if let Some((_req, tx)) = entry {
            self.event_bus.publish(OrchestrationEvent::ApprovalResolved {
                request_id: request_id.to_string(),
                response: response.kind(),
            });
            // Receiver may already be gone if the step timed out.
            let _ = tx.send(response);
            true
        } else {
            false
        }
    }

    /// List all pending approvals.
    pub async fn pending_requests(&self) -> Vec<ApprovalRequest> {
        self.pending
            .lock()
            .await
            .values()
            .map(|(req, _)| req.clone())
            .collect()
    }

    /// Find a pending request by prefix match on the ID.
    pub async fn find_by_prefix(&self, prefix: &str) -> Option<String> {
        let pending = self.pending.lock().await;
        pending.keys().find(|k| k.starts_with(prefix)).cloned()
    }
}

impl ApprovalHandler for ApprovalBroker {
    fn request_approval(&self, request: ApprovalRequest) -> BoxFuture<'_, Result<ApprovalResponse>> {
        Box::pin(async move {
            let id = request.id.clone();
            let rx = self.request(request).await;
            let mut guard = PendingGuard {
                broker: self,
                id: id.clone(),
                armed: true,
            };
            let response = rx.await;
            guard.armed = false;
            response.map_err(|_| {
                warn!(request_id = %id, "Approval request dropped without a response");
                MaestroError::AgentExecution {
                    agent: "approval_broker".into(),
                    message: format!("approval request {} was abandoned", id),
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::steps::{HumanApproval, Step};
    use std::time::Duration;

    #[tokio::test]
    async fn respond_approve() {
        let broker = ApprovalBroker::new(Arc::new(EventBus::default()));

        let rx = broker.request(ApprovalRequest::new("deploy?", "v1")).await;
        let id = broker.pending_requests().await[0].id.clone();
        assert!(broker.respond(&id, ApprovalResponse::Approved).await);
        assert_eq!(rx.await.unwrap(), ApprovalResponse::Approved);
    }

    #[tokio::test]
    async fn respond_unknown_id() {
        let broker = ApprovalBroker::new(Arc::new(EventBus::default()));
        assert!(!broker.respond("nonexistent", ApprovalResponse::Approved).await);
    }

    #[tokio::test]
    async fn find_by_prefix() {
        let broker = ApprovalBroker::new(Arc::new(EventBus::default()));
        let req = ApprovalRequest::new("deploy?", "v1");
        let id = req.id.clone();
        let _rx = broker.request(req).await;
        assert_eq!(broker.find_by_prefix(&id[..8]).await, Some(id));
        assert!(broker.find_by_prefix("zzzz-no").await.is_none());
    }

    #[tokio::test]
    async fn drives_human_approval_step() {
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let broker = Arc::new(ApprovalBroker::new(bus));
        let step = HumanApproval::new("publish?").with_handler(broker.clone());

        let responder = broker.clone();
        tokio::spawn(async move {
            let request = match events.recv().await.unwrap() {
                OrchestrationEvent::ApprovalRequested { request } => request,
                other => panic!("unexpected event: {:?}", other),
            };
            assert_eq!(request.current_output, "draft");
            responder
                .respond(
                    &request.id,
                    ApprovalResponse::Modified {
                        new_input: "final".into(),
                    },
                )
                .await;
        });

        let result = step.execute("draft".into(), RunContext::new("draft")).await.unwrap();
        assert_eq!(result.output, "final");
        assert!(broker.pending_requests().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscriber_can_respond_as_soon_as_event_arrives() {
        for _ in 0..50 {
            let bus = Arc::new(EventBus::default());
            let mut events = bus.subscribe();
            let broker = Arc::new(ApprovalBroker::new(bus));

            let responder = broker.clone();
            let answered = tokio::spawn(async move {
                if let Ok(OrchestrationEvent::ApprovalRequested { request }) = events.recv().await {
                    responder.respond(&request.id, ApprovalResponse::Approved).await
                } else {
                    false
                }
            });

            let step = HumanApproval::new("ship?")
                .with_handler(broker.clone())
                .with_timeout(Duration::from_secs(5));
            let result = step.execute("v2".into(), RunContext::new("v2")).await.unwrap();
            assert_eq!(result.output, "v2");
            assert!(answered.await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_is_withdrawn() {
        let broker = Arc::new(ApprovalBroker::new(Arc::new(EventBus::default())));
        let step = HumanApproval::new("publish?")
            .with_handler(broker.clone())
            .with_timeout(Duration::from_secs(5));

        let err = step.execute("draft".into(), RunContext::new("draft")).await.unwrap_err();
        assert!(matches!(err, MaestroError::Timeout { .. }));
        assert!(broker.pending_requests().await.is_empty());
    }
}
