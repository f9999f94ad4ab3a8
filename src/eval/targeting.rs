use crate::{
    configuration::EvaluationMode, EvaluationContext, EvaluationResult, FlagConfiguration,
    RuleEvaluator,
};

/// Attribute-based targeting. Rules are tried in stored order and the first match wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetingEvaluator;

impl TargetingEvaluator {
    pub const PRIORITY: i32 = 50;
}

impl RuleEvaluator for TargetingEvaluator {
    fn name(&self) -> &'static str {
        "UserTargeted"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn modes(&self) -> &'static [EvaluationMode] {
        &[EvaluationMode::UserTargeted]
    }

    fn can_process(&self, config: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        config.has_mode(EvaluationMode::UserTargeted) && !config.targeting_rules().is_empty()
    }

    fn evaluate(
        &self,
        config: &FlagConfiguration,
        context: &EvaluationContext,
    ) -> Option<EvaluationResult> {
        let attributes = context.attributes();
        config
            .targeting_rules()
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(attributes))
            .map(|(index, rule)| {
                EvaluationResult::enabled(
                    &rule.variation,
                    format!("matched targeting rule #{index} on \"{}\"", rule.attribute),
                )
            })
    }
}
