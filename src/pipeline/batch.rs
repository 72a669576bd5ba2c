//! Adaptive batch execution with context-overflow fallback.
//!
//! A work unit (one or more logical items plus context) goes to the
//! generation service as a single call. Transient and malformed failures are
//! retried in place with backoff. Context overflow splits the unit at the
//! item-count midpoint and recurses on each half, converging on single-item
//! requests; a single item that still overflows gets one last try at the
//! minimal context floor and then degrades to a placeholder. The worst case
//! for any item is therefore a flagged placeholder, never a lost item or an
//! aborted stage.

use std::time::{Duration, Instant};

use crate::config::PipelineSettings;
use crate::generation::{GenerationClient, GenerationError};

use super::parse::ParseError;
use super::prompts::ContextTier;

/// Retry knobs, lifted out of [`PipelineSettings`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
}

impl From<&PipelineSettings> for RetryPolicy {
    fn from(s: &PipelineSettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            backoff_base_secs: s.backoff_base_secs,
        }
    }
}

/// Renders, parses and substitutes for one family of work items.
pub trait UnitProcessor {
    type Item;
    type Output;

    /// Render the prompt for a unit at the given context tier.
    fn render(
        &self,
        items: &[Self::Item],
        tier: ContextTier,
    ) -> crate::generation::GenerationRequest;

    /// Parse the model response into exactly one output per item, in item
    /// order. A count mismatch is treated as malformed output upstream.
    fn parse(&self, response: &str, items: &[Self::Item])
        -> Result<Vec<Self::Output>, ParseError>;

    /// Degraded stand-in for an item that defeated every fallback.
    fn placeholder(&self, item: &Self::Item) -> Self::Output;
}

/// One item's result, flagged when it is a degraded placeholder.
#[derive(Debug, Clone)]
pub struct UnitOutcome<T> {
    pub output: T,
    pub degraded: bool,
}

enum AttemptError {
    Overflow,
    Exhausted,
    Fatal(GenerationError),
}

/// Drives work units through the generation service with retry, split and
/// degrade fallbacks. Single-threaded by design: the per-unit callback (and
/// through it the statistics accumulator) is only ever invoked serially.
pub struct BatchFallbackExecutor<'a, P: UnitProcessor> {
    client: &'a dyn GenerationClient,
    processor: P,
    policy: RetryPolicy,
}

impl<'a, P: UnitProcessor> BatchFallbackExecutor<'a, P> {
    pub fn new(client: &'a dyn GenerationClient, processor: P, policy: RetryPolicy) -> Self {
        Self {
            client,
            processor,
            policy,
        }
    }

    /// Process every item, returning exactly one outcome per item in the
    /// original order. Only [`GenerationError::Fatal`] propagates;
    /// `on_unit` receives the wall-clock duration of each resolved unit.
    pub fn run(
        &self,
        items: Vec<P::Item>,
        on_unit: &mut dyn FnMut(Duration),
    ) -> Result<Vec<UnitOutcome<P::Output>>, GenerationError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        // Depth bound guaranteeing termination: halving reaches single
        // items in ceil(log2(n)) steps.
        let depth_limit = (items.len() as f64).log2().ceil() as u32;
        self.process(items, 0, depth_limit, on_unit)
    }

    fn process(
        &self,
        items: Vec<P::Item>,
        depth: u32,
        depth_limit: u32,
        on_unit: &mut dyn FnMut(Duration),
    ) -> Result<Vec<UnitOutcome<P::Output>>, GenerationError> {
        let tier = ContextTier::for_batch(items.len());
        let started = Instant::now();

        match self.attempt_with_retries(&items, tier) {
            Ok(outputs) => {
                on_unit(started.elapsed());
                return Ok(outputs
                    .into_iter()
                    .map(|output| UnitOutcome {
                        output,
                        degraded: false,
                    })
                    .collect());
            }
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Exhausted) => {
                tracing::warn!(
                    items = items.len(),
                    "Work unit degraded after exhausting retries"
                );
                on_unit(started.elapsed());
                return Ok(self.placeholders(&items));
            }
            Err(AttemptError::Overflow) => {}
        }

        // Context overflow: shrink the unit.
        if items.len() > 1 && depth < depth_limit {
            tracing::debug!(
                items = items.len(),
                depth,
                "Context overflow, splitting unit at midpoint"
            );
            let mut front = items;
            let back = front.split_off(front.len() / 2);
            let mut results = self.process(front, depth + 1, depth_limit, on_unit)?;
            results.extend(self.process(back, depth + 1, depth_limit, on_unit)?);
            return Ok(results);
        }

        // Single item overflowing at Full tier: one last try at the floor.
        if items.len() == 1 {
            match self.attempt_once(&items, ContextTier::Minimal) {
                Ok(outputs) => {
                    on_unit(started.elapsed());
                    return Ok(outputs
                        .into_iter()
                        .map(|output| UnitOutcome {
                            output,
                            degraded: false,
                        })
                        .collect());
                }
                Err(GenerationError::Fatal(m)) => return Err(GenerationError::Fatal(m)),
                Err(e) => {
                    tracing::warn!(error = %e, "Minimal-context retry failed, emitting placeholder");
                }
            }
        }

        on_unit(started.elapsed());
        Ok(self.placeholders(&items))
    }

    fn attempt_with_retries(
        &self,
        items: &[P::Item],
        tier: ContextTier,
    ) -> Result<Vec<P::Output>, AttemptError> {
        for attempt in 0..self.policy.max_attempts {
            match self.attempt_once(items, tier) {
                Ok(outputs) => return Ok(outputs),
                Err(GenerationError::ContextOverflow(detail)) => {
                    tracing::debug!(items = items.len(), detail = %detail, "Context overflow reported");
                    return Err(AttemptError::Overflow);
                }
                Err(GenerationError::Fatal(m)) => {
                    return Err(AttemptError::Fatal(GenerationError::Fatal(m)))
                }
                Err(e) => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        max = self.policy.max_attempts,
                        error = %e,
                        "Generation attempt failed"
                    );
                    if attempt + 1 < self.policy.max_attempts {
                        self.backoff(attempt);
                    }
                }
            }
        }
        Err(AttemptError::Exhausted)
    }

    fn attempt_once(
        &self,
        items: &[P::Item],
        tier: ContextTier,
    ) -> Result<Vec<P::Output>, GenerationError> {
        let request = self.processor.render(items, tier);
        let response = self.client.generate(&request)?;
        let outputs = self
            .processor
            .parse(&response, items)
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        if outputs.len() != items.len() {
            return Err(GenerationError::Malformed(format!(
                "expected {} results, got {}",
                items.len(),
                outputs.len()
            )));
        }
        Ok(outputs)
    }

    fn placeholders(&self, items: &[P::Item]) -> Vec<UnitOutcome<P::Output>> {
        items
            .iter()
            .map(|item| UnitOutcome {
                output: self.processor.placeholder(item),
                degraded: true,
            })
            .collect()
    }

    fn backoff(&self, attempt: u32) {
        let secs = self
            .policy
            .backoff_base_secs
            .saturating_mul(1u64 << attempt.min(6));
        if secs > 0 {
            std::thread::sleep(Duration::from_secs(secs));
        }
    }
}
