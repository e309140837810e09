use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::debug;

use maestro_core::error::Result;
use maestro_core::types::StepResult;

use super::{secs, Step};
use crate::context::RunContext;

/// Runs children in order, feeding each output into the next input.
pub struct Sequence {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl Sequence {
    pub fn new(steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            name: "sequence".to_string(),
            steps,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Step for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: String, ctx: RunContext) -> BoxFuture<'_, Result<StepResult>> {
        Box::pin(async move {
            let start = Instant::now();
            let mut result = StepResult::new(input);

            for (i, step) in self.steps.iter().enumerate() {
                debug!(sequence = %self.name, index = i, step = %step.name(), "Running sequence step");
                let child = step.execute(result.output.clone(), ctx.clone()).await?;
                result.absorb(&child, &format!("sequence.step.{}", i));
                result.iteration_count += child.iteration_count;
                result.output = child.output;
            }

            result.duration = start.elapsed();
            result.set_metadata("sequence.steps", self.steps.len());
            result.set_metadata("sequence.duration", secs(result.duration));
            Ok(result)
        })
    }
}
