use crate::{
    configuration::EvaluationMode, EvaluationContext, EvaluationResult, FlagConfiguration,
    RuleEvaluator,
};

/// Enables a flag between its `enable_on` and `disable_on` instants. Compared in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleEvaluator;

impl ScheduleEvaluator {
    pub const PRIORITY: i32 = 10;
}

impl RuleEvaluator for ScheduleEvaluator {
    fn name(&self) -> &'static str {
        "Scheduled"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn modes(&self) -> &'static [EvaluationMode] {
        &[EvaluationMode::Scheduled]
    }

    fn can_process(&self, config: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        config.has_mode(EvaluationMode::Scheduled)
    }

    fn evaluate(
        &self,
        config: &FlagConfiguration,
        context: &EvaluationContext,
    ) -> Option<EvaluationResult> {
        let now = context.timestamp();
        let schedule = config.schedule();
        let variation = config.default_variation();

        if let Some(enable_on) = schedule.enable_on {
            if now < enable_on {
                return Some(EvaluationResult::disabled(
                    variation,
                    format!("scheduled to enable on {}", enable_on.to_rfc3339()),
                ));
            }
        }

        // The cutover instant itself is already disabled.
        if let Some(disable_on) = schedule.disable_on {
            if now >= disable_on {
                return Some(EvaluationResult::disabled(
                    variation,
                    format!("disabled by schedule on {}", disable_on.to_rfc3339()),
                ));
            }
        }

        Some(EvaluationResult::enabled(variation, "within activation schedule"))
    }
}
