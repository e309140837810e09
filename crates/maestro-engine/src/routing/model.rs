use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use maestro_core::config::RoutingConfig;
use maestro_core::error::{MaestroError, Result};
use maestro_core::traits::InferenceProvider;

use super::{AgentDescription, KeywordStrategy, RoutingDecision, RoutingStrategy};
use crate::context::RunContext;

const EXACT_MATCH_CONFIDENCE: f64 = 0.95;
const SUBSTRING_MATCH_CONFIDENCE: f64 = 0.85;

/// Asks an inference provider to name the best candidate.
///
/// Never fails the routing operation on a bad reply: provider errors and
/// unparseable answers degrade to keyword matching at a discounted confidence.
pub struct ModelStrategy {
    provider: Arc<dyn InferenceProvider>,
    fallback: KeywordStrategy,
    fallback_discount: f64,
}

impl ModelStrategy {
    pub fn new(provider: Arc<dyn InferenceProvider>) -> Self {
        Self::from_config(provider, &RoutingConfig::default())
    }

    pub fn from_config(provider: Arc<dyn InferenceProvider>, config: &RoutingConfig) -> Self {
        Self {
            provider,
            fallback: KeywordStrategy::from_config(config),
            fallback_discount: config.model_fallback_discount,
        }
    }

    /// Prompt listing every candidate's description, capabilities, and keywords.
    pub fn build_prompt(input: &str, candidates: &[AgentDescription]) -> String {
        let mut prompt = String::from(
            "You are routing a request to exactly one agent.\n\nAvailable agents:\n",
        );
        for c in candidates {
            prompt.push_str(&format!("- {}: {}\n", c.name, c.description));
            if !c.capabilities.is_empty() {
                prompt.push_str(&format!("  capabilities: {}\n", c.capabilities.join(", ")));
            }
            if !c.keywords.is_empty() {
                prompt.push_str(&format!("  keywords: {}\n", c.keywords.join(", ")));
            }
        }
        prompt.push_str(&format!(
            "\nRequest:\n{}\n\nReply with only the name of the single best agent.",
            input
        ));
        prompt
    }

    /// Map a model reply to a candidate: exact name first, then substring.
    pub fn resolve_reply(reply: &str, candidates: &[AgentDescription]) -> Option<RoutingDecision> {
        let cleaned = reply
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .trim();
        let lower = cleaned.to_lowercase();

        if let Some(c) = candidates.iter().find(|c| c.name.to_lowercase() == lower) {
            return Some(
                RoutingDecision::new(c.name.clone(), EXACT_MATCH_CONFIDENCE)
                    .with_reasoning(format!("model selected '{}'", c.name)),
            );
        }

        // Longest name wins so "math" does not shadow "math_tutor".
        candidates
            .iter()
            .filter(|c| !c.name.is_empty() && lower.contains(&c.name.to_lowercase()))
            .max_by_key(|c| c.name.len())
            .map(|c| {
                RoutingDecision::new(c.name.clone(), SUBSTRING_MATCH_CONFIDENCE)
                    .with_reasoning(format!("model reply mentioned '{}'", c.name))
            })
    }

    fn degrade(
        &self,
        input: &str,
        candidates: &[AgentDescription],
        why: &str,
    ) -> Result<RoutingDecision> {
        let keyword = self.fallback.select(input, candidates)?;
        let confidence = keyword.confidence * self.fallback_discount;
        Ok(RoutingDecision::new(keyword.selected_name, confidence)
            .with_reasoning(format!("{}; fell back to keyword matching", why)))
    }
}

impl RoutingStrategy for ModelStrategy {
    fn name(&self) -> &str {
        "model"
    }

    fn select_agent<'a>(
        &'a self,
        input: &'a str,
        candidates: &'a [AgentDescription],
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<RoutingDecision>> {
        Box::pin(async move {
            if candidates.is_empty() {
                return Err(MaestroError::NoCandidates);
            }

            let prompt = Self::build_prompt(input, candidates);
            let reply = match self.provider.generate(prompt).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, "Routing model failed");
                    return self.degrade(input, candidates, &format!("model error: {}", e));
                }
            };

            match Self::resolve_reply(&reply, candidates) {
                Some(decision) => {
                    debug!(selected = %decision.selected_name, confidence = decision.confidence, "Model routing");
                    Ok(decision)
                }
                None => {
                    warn!(reply = %reply.trim(), "Routing model reply named no candidate");
                    self.degrade(input, candidates, "unparseable model reply")
                }
            }
        })
    }
}
