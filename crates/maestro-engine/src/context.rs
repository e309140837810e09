use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use maestro_core::types::{DynamicValue, Message};

/// Shared state for one orchestration run.
///
/// Cloning a `RunContext` yields another handle to the same run; all
/// mutation goes through one lock, so writers are serialized and readers
/// see a consistent view. Use [`RunContext::copy`] for an independent context.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    original_input: String,
    execution_id: Uuid,
    created_at: DateTime<Utc>,
    state: RwLock<ContextState>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ContextState {
    values: HashMap<String, DynamicValue>,
    messages: Vec<Message>,
    execution_path: Vec<String>,
}

/// Point-in-time copy of a context's contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub original_input: String,
    pub execution_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub values: HashMap<String, DynamicValue>,
    pub messages: Vec<Message>,
    pub execution_path: Vec<String>,
}

impl RunContext {
    pub fn new(original_input: impl Into<String>) -> Self {
        Self::build(original_input.into(), HashMap::new(), CancellationToken::new())
    }

    fn build(
        original_input: String,
        values: HashMap<String, DynamicValue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                original_input,
                execution_id: Uuid::new_v4(),
                created_at: Utc::now(),
                state: RwLock::new(ContextState {
                    values,
                    ..Default::default()
                }),
                cancel,
            }),
        }
    }

    pub fn original_input(&self) -> &str {
        &self.inner.original_input
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Get a value by key.
    pub async fn get(&self, key: &str) -> Option<DynamicValue> {
        self.inner.state.read().await.values.get(key).cloned()
    }

    /// Get a value as a string, if it's a string.
    pub async fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).await.and_then(|v| v.as_str().map(str::to_string))
    }

    /// Set a value, returning the previous one.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<DynamicValue>) -> Option<DynamicValue> {
        self.inner
            .state
            .write()
            .await
            .values
            .insert(key.into(), value.into())
    }

    pub async fn remove(&self, key: &str) -> Option<DynamicValue> {
        self.inner.state.write().await.values.remove(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.state.read().await.values.contains_key(key)
    }

    pub async fn values(&self) -> HashMap<String, DynamicValue> {
        self.inner.state.read().await.values.clone()
    }

    /// Overwrite several values under one write lock.
    pub async fn extend_values(&self, values: HashMap<String, DynamicValue>) {
        self.inner.state.write().await.values.extend(values);
    }

    pub async fn add_message(&self, message: Message) {
        self.inner.state.write().await.messages.push(message);
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.read().await.messages.clone()
    }

    /// Append an agent name to the execution path.
    pub async fn record_execution(&self, agent: impl Into<String>) {
        let agent = agent.into();
        debug!(execution_id = %self.inner.execution_id, agent = %agent, "Recording execution");
        self.inner.state.write().await.execution_path.push(agent);
    }

    pub async fn execution_path(&self) -> Vec<String> {
        self.inner.state.read().await.execution_path.clone()
    }

    /// Consistent copy of everything in the context, taken under one read lock.
    pub async fn snapshot(&self) -> ContextSnapshot {
        let state = self.inner.state.read().await;
        ContextSnapshot {
            original_input: self.inner.original_input.clone(),
            execution_id: self.inner.execution_id,
            created_at: self.inner.created_at,
            values: state.values.clone(),
            messages: state.messages.clone(),
            execution_path: state.execution_path.clone(),
        }
    }

    /// New context with the same original input and a snapshot of the values.
    ///
    /// Messages and execution path start empty; the copy gets its own
    /// execution id and is cancelled whenever this context is.
    pub async fn copy(&self) -> RunContext {
        let values = self.values().await;
        Self::build(
            self.inner.original_input.clone(),
            values,
            self.inner.cancel.child_token(),
        )
    }

    /// Full copy, logs included, with its own cancellation token.
    ///
    /// Used to carry a run past a cancellation: the copy is not cancelled
    /// even if this context is.
    pub async fn detach(&self) -> RunContext {
        let snap = self.snapshot().await;
        let ctx = Self::build(snap.original_input, snap.values, CancellationToken::new());
        {
            let mut state = ctx.inner.state.write().await;
            state.messages = snap.messages;
            state.execution_path = snap.execution_path;
        }
        ctx
    }

    /// Fold another context into this one: values overwrite, logs append.
    pub async fn merge_from(&self, other: &RunContext) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let theirs = other.snapshot().await;
        let mut state = self.inner.state.write().await;
        state.values.extend(theirs.values);
        state.messages.extend(theirs.messages);
        state.execution_path.extend(theirs.execution_path);
    }

    /// Cancel the run. In-flight steps observing this context stop with `Cancelled`.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("execution_id", &self.inner.execution_id)
            .field("original_input", &self.inner.original_input)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}
