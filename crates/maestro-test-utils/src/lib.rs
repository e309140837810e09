//! Shared mocks and fixtures for Maestro tests.
//!
//! Every mock counts its calls so tests can assert which agents ran.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use maestro_core::error::{MaestroError, Result};
use maestro_core::traits::{AgentHandle, ApprovalHandler, InferenceProvider, RunHooks};
use maestro_core::types::{
    ApprovalRequest, ApprovalResponse, SessionId, StepResult, TokenUsage, ToolCall, ToolResult,
};

type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Agent whose output is a pure function of its input.
pub struct MockAgent {
    name: String,
    transform: Transform,
    usage: Option<TokenUsage>,
    tool: Option<String>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl MockAgent {
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            transform: Arc::new(transform),
            usage: None,
            tool: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(vec![]),
        }
    }

    /// Replies `"{name}: {input}"`.
    pub fn echo(name: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = name.clone();
        Self::new(name, move |input| format!("{}: {}", prefix, input))
    }

    /// Report this token usage on every run.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
        });
        self
    }

    /// Record one successful call to `tool` on every run.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

impl AgentHandle for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        input: String,
        _session: Option<SessionId>,
        _hooks: Option<Arc<dyn RunHooks>>,
    ) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(input.clone());

            let mut result = StepResult::new((self.transform)(&input));
            if let Some(usage) = self.usage {
                result = result.with_token_usage(usage);
            }
            if let Some(tool) = &self.tool {
                let id = format!("{}-{}", self.name, n);
                result.tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: tool.clone(),
                    arguments: serde_json::json!({ "input": input }),
                });
                result.tool_results.push(ToolResult::success(id, "ok"));
            }
            Ok(result)
        })
    }
}

/// Agent that always fails with `AgentExecution`.
pub struct FailingAgent {
    name: String,
    message: String,
    calls: AtomicUsize,
}

impl FailingAgent {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AgentHandle for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        _input: String,
        _session: Option<SessionId>,
        _hooks: Option<Arc<dyn RunHooks>>,
    ) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MaestroError::AgentExecution {
                agent: self.name.clone(),
                message: self.message.clone(),
            })
        })
    }
}

/// Agent that sleeps for a fixed time, then echoes `"{name}: {input}"`.
///
/// Pair with `#[tokio::test(start_paused = true)]` for exact timings.
pub struct SlowAgent {
    name: String,
    delay: Duration,
    started: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowAgent {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl AgentHandle for SlowAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        input: String,
        _session: Option<SessionId>,
        _hooks: Option<Arc<dyn RunHooks>>,
    ) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(StepResult::new(format!("{}: {}", self.name, input)).with_duration(self.delay))
        })
    }
}

/// Inference provider returning scripted replies in order.
pub struct MockInferenceProvider {
    replies: Mutex<VecDeque<String>>,
    failure: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockInferenceProvider {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            failure: None,
            prompts: Mutex::new(vec![]),
        }
    }

    /// Every call fails with `Inference(message)`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            failure: Some(message.into()),
            prompts: Mutex::new(vec![]),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl InferenceProvider for MockInferenceProvider {
    fn generate(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt);
            if let Some(message) = &self.failure {
                return Err(MaestroError::Inference(message.clone()));
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| MaestroError::Inference("no scripted reply left".into()))
        })
    }
}

/// Approval handler answering from a script; approves once the script runs out.
pub struct ScriptedApprovalHandler {
    responses: Mutex<VecDeque<ApprovalResponse>>,
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl ScriptedApprovalHandler {
    pub fn new(responses: Vec<ApprovalResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ApprovalHandler for ScriptedApprovalHandler {
    fn request_approval(&self, request: ApprovalRequest) -> BoxFuture<'_, Result<ApprovalResponse>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ApprovalResponse::Approved))
        })
    }
}

/// Approval handler that approves after a delay and tracks whether its
/// pending future was dropped before finishing.
pub struct SlowApprovalHandler {
    delay: Duration,
    counters: Arc<ApprovalCounters>,
}

#[derive(Default)]
struct ApprovalCounters {
    started: AtomicUsize,
    finished: AtomicUsize,
    dropped: AtomicUsize,
}

struct DropProbe {
    counters: Arc<ApprovalCounters>,
    finished: bool,
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        if !self.finished {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl SlowApprovalHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            counters: Arc::new(ApprovalCounters::default()),
        }
    }

    pub fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.counters.finished.load(Ordering::SeqCst)
    }

    /// Requests abandoned mid-wait.
    pub fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::SeqCst)
    }
}

impl ApprovalHandler for SlowApprovalHandler {
    fn request_approval(&self, _request: ApprovalRequest) -> BoxFuture<'_, Result<ApprovalResponse>> {
        Box::pin(async move {
            self.counters.started.fetch_add(1, Ordering::SeqCst);
            let mut probe = DropProbe {
                counters: self.counters.clone(),
                finished: false,
            };
            tokio::time::sleep(self.delay).await;
            probe.finished = true;
            self.counters.finished.fetch_add(1, Ordering::SeqCst);
            Ok(ApprovalResponse::Approved)
        })
    }
}

/// Hooks that record each callback as `start:{agent}`, `end:{agent}`, or `handoff:{from}->{to}`.
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<String>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl RunHooks for RecordingHooks {
    fn on_agent_start(&self, agent: &str, _input: &str) {
        self.events.lock().unwrap().push(format!("start:{}", agent));
    }

    fn on_agent_end(&self, agent: &str, _result: &StepResult) {
        self.events.lock().unwrap().push(format!("end:{}", agent));
    }

    fn on_handoff(&self, from: &str, to: &str) {
        self.events.lock().unwrap().push(format!("handoff:{}->{}", from, to));
    }
}

/// Write `content` to `maestro.toml` in a fresh temp dir. Keep the dir alive while using the path.
pub fn temp_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("maestro.toml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}
