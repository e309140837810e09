use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MaestroError, Result};

/// Top-level Maestro configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaestroConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum DAG nodes in flight at once (0 = unlimited).
    #[serde(default)]
    pub dag_max_concurrency: usize,
    /// Wall-clock budget for a whole workflow run.
    #[serde(default)]
    pub workflow_timeout_secs: Option<u64>,
}

/// What a HumanApproval step does when no handler is configured.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnattendedPolicy {
    /// Approve immediately. Recorded in metadata and logged.
    #[default]
    AutoApprove,
    /// Fail the step as if a human had rejected it.
    Reject,
    /// Fail with `ApprovalRequired` so the workflow suspends.
    Suspend,
}

impl UnattendedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::Reject => "reject",
            Self::Suspend => "suspend",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub unattended: UnattendedPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Minimum keyword confidence before falling back to the first candidate.
    #[serde(default = "default_keyword_threshold")]
    pub keyword_threshold: f64,
    /// Multiplier applied to keyword confidence when model routing degrades.
    #[serde(default = "default_model_fallback_discount")]
    pub model_fallback_discount: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            keyword_threshold: default_keyword_threshold(),
            model_fallback_discount: default_model_fallback_discount(),
        }
    }
}

fn default_keyword_threshold() -> f64 {
    0.1
}

fn default_model_fallback_discount() -> f64 {
    0.7
}

/// How often a running workflow persists its progress.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    Disabled,
    #[default]
    EveryStep,
    EveryNSteps(usize),
}

impl CheckpointPolicy {
    /// Whether to save after `completed` steps have finished.
    pub fn should_checkpoint(&self, completed: usize) -> bool {
        match self {
            Self::Disabled => false,
            Self::EveryStep => completed > 0,
            Self::EveryNSteps(0) => false,
            Self::EveryNSteps(n) => completed > 0 && completed % n == 0,
        }
    }
}

/// Checkpoint / resume configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,
    /// Directory for checkpoint files.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,
    #[serde(default)]
    pub policy: CheckpointPolicy,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            dir: default_checkpoint_dir(),
            policy: CheckpointPolicy::default(),
        }
    }
}

impl CheckpointConfig {
    /// Policy to apply, accounting for `enabled = false`.
    pub fn effective_policy(&self) -> CheckpointPolicy {
        if self.enabled {
            self.policy
        } else {
            CheckpointPolicy::Disabled
        }
    }
}

fn default_checkpoint_enabled() -> bool {
    true
}

fn default_checkpoint_dir() -> String {
    "./checkpoints".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// tracing-subscriber EnvFilter directive.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "maestro=info,warn".to_string()
}

impl MaestroConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| MaestroError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| MaestroError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.routing.keyword_threshold) {
            return Err(MaestroError::InvalidConfig(format!(
                "routing.keyword_threshold must be within [0, 1], got {}",
                self.routing.keyword_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.routing.model_fallback_discount) {
            return Err(MaestroError::InvalidConfig(format!(
                "routing.model_fallback_discount must be within [0, 1], got {}",
                self.routing.model_fallback_discount
            )));
        }
        if self.checkpoint.policy == CheckpointPolicy::EveryNSteps(0) {
            return Err(MaestroError::InvalidConfig(
                "checkpoint.policy every_n_steps must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the checkpoint directory (expand ~).
    pub fn checkpoint_dir(&self) -> PathBuf {
        let dir = &self.checkpoint.dir;
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(dir)
    }

    /// Log filter directive, falling back to the default.
    pub fn log_filter(&self) -> String {
        self.log
            .as_ref()
            .map(|l| l.filter.clone())
            .unwrap_or_else(default_log_filter)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    warn!(var = %var_name, "Config references an unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
