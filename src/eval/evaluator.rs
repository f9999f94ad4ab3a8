use serde::{Deserialize, Serialize};

use crate::{configuration::EvaluationMode, EvaluationContext, FlagConfiguration};

/// Outcome of evaluating a flag for one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub is_enabled: bool,
    /// Name of the selected variation.
    pub variation: String,
    /// Human-readable explanation of the decision.
    pub reason: String,
}

impl EvaluationResult {
    pub fn enabled(variation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            is_enabled: true,
            variation: variation.into(),
            reason: reason.into(),
        }
    }

    pub fn disabled(variation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            is_enabled: false,
            variation: variation.into(),
            reason: reason.into(),
        }
    }
}

/// A single evaluation concern of the pipeline.
///
/// Implementations must be side-effect free: the same `(config, context)` always yields the same
/// answer, which is what makes a single [`EvaluationManager`](super::EvaluationManager) safe to
/// share between threads.
pub trait RuleEvaluator: Send + Sync {
    /// Name of the concern, used in combined reasons.
    fn name(&self) -> &'static str;

    /// Fixed ordering key. Lower runs first.
    fn priority(&self) -> i32;

    /// Activation modes this concern decides. An enabled result satisfies each of them that is
    /// active on the flag.
    fn modes(&self) -> &'static [EvaluationMode] {
        &[]
    }

    /// Return `true` if this concern is active for the flag and context.
    fn can_process(&self, config: &FlagConfiguration, context: &EvaluationContext) -> bool;

    /// Produce a decision, or `None` if the concern has no opinion for this context (the
    /// evaluation falls through to the next evaluator).
    fn evaluate(
        &self,
        config: &FlagConfiguration,
        context: &EvaluationContext,
    ) -> Option<EvaluationResult>;
}
