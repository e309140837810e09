use futures::future::BoxFuture;
use tracing::debug;

use maestro_core::config::RoutingConfig;
use maestro_core::error::{MaestroError, Result};

use super::{AgentDescription, RoutingDecision, RoutingStrategy};
use crate::context::RunContext;

const KEYWORD_WEIGHT: f64 = 10.0;
const CAPABILITY_WEIGHT: f64 = 5.0;
const NAME_WEIGHT: f64 = 3.0;

/// Scores candidates by case-insensitive substring hits in the input.
pub struct KeywordStrategy {
    threshold: f64,
}

impl Default for KeywordStrategy {
    fn default() -> Self {
        Self::new(RoutingConfig::default().keyword_threshold)
    }
}

impl KeywordStrategy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(config.keyword_threshold)
    }

    /// Score in [0, 1]: weighted hits over the candidate's own maximum.
    pub fn match_score(input: &str, candidate: &AgentDescription) -> f64 {
        let input_lower = input.to_lowercase();
        let hit = |s: &str| !s.is_empty() && input_lower.contains(&s.to_lowercase());

        let mut score = 0.0;
        for keyword in &candidate.keywords {
            if hit(keyword) {
                score += KEYWORD_WEIGHT;
            }
        }
        for cap in &candidate.capabilities {
            if hit(cap) {
                score += CAPABILITY_WEIGHT;
            }
        }
        if hit(&candidate.name) {
            score += NAME_WEIGHT;
        }

        let max = KEYWORD_WEIGHT * candidate.keywords.len() as f64
            + CAPABILITY_WEIGHT * candidate.capabilities.len() as f64
            + NAME_WEIGHT;
        score / max
    }

    /// Synchronous selection, shared with the model strategy's fallback path.
    pub fn select(&self, input: &str, candidates: &[AgentDescription]) -> Result<RoutingDecision> {
        let first = candidates.first().ok_or(MaestroError::NoCandidates)?;

        let mut best: Option<(&AgentDescription, f64)> = None;
        for candidate in candidates {
            let score = Self::match_score(input, candidate);
            debug!(candidate = %candidate.name, score, "Keyword score");
            // Strictly greater, so ties go to the earlier candidate.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((candidate, score)) if score >= self.threshold => Ok(RoutingDecision::new(
                candidate.name.clone(),
                score,
            )
            .with_reasoning(format!("keyword match score {:.2}", score))),
            _ => Ok(RoutingDecision::new(first.name.clone(), 0.0).with_reasoning(format!(
                "no candidate reached threshold {:.2}, defaulting to first",
                self.threshold
            ))),
        }
    }
}

impl RoutingStrategy for KeywordStrategy {
    fn name(&self) -> &str {
        "keyword"
    }

    fn select_agent<'a>(
        &'a self,
        input: &'a str,
        candidates: &'a [AgentDescription],
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<RoutingDecision>> {
        Box::pin(async move { self.select(input, candidates) })
    }
}
