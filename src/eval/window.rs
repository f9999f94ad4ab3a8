use chrono::Datelike;
use chrono_tz::Tz;

use crate::{
    configuration::EvaluationMode, EvaluationContext, EvaluationResult, FlagConfiguration,
    RuleEvaluator,
};

/// Enables a flag during a recurring time-of-day window on selected weekdays.
#[derive(Debug, Clone, Copy)]
pub struct OperationalWindowEvaluator {
    /// Used when neither the window nor the context carries a time zone.
    default_time_zone: Tz,
}

impl OperationalWindowEvaluator {
    pub const PRIORITY: i32 = 20;

    pub fn new(default_time_zone: Tz) -> Self {
        Self { default_time_zone }
    }
}

impl Default for OperationalWindowEvaluator {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl RuleEvaluator for OperationalWindowEvaluator {
    fn name(&self) -> &'static str {
        "TimeWindow"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn modes(&self) -> &'static [EvaluationMode] {
        &[EvaluationMode::TimeWindow]
    }

    fn can_process(&self, config: &FlagConfiguration, _context: &EvaluationContext) -> bool {
        config.has_mode(EvaluationMode::TimeWindow)
    }

    fn evaluate(
        &self,
        config: &FlagConfiguration,
        context: &EvaluationContext,
    ) -> Option<EvaluationResult> {
        let variation = config.default_variation();
        let Some(window) = config.window() else {
            return Some(EvaluationResult::disabled(
                variation,
                "time window mode is active but no window is configured",
            ));
        };

        let time_zone = window
            .time_zone
            .or(context.time_zone())
            .unwrap_or(self.default_time_zone);
        let local = context.timestamp().with_timezone(&time_zone);

        if !window.is_active_on(local.weekday()) {
            return Some(EvaluationResult::disabled(
                variation,
                format!("time window is not active on {}", local.weekday()),
            ));
        }

        let time = local.time();
        if window.contains_time(time) {
            Some(EvaluationResult::enabled(
                variation,
                format!("within time window {}-{} {}", window.start, window.stop, time_zone),
            ))
        } else {
            Some(EvaluationResult::disabled(
                variation,
                format!("outside time window {}-{} {}", window.start, window.stop, time_zone),
            ))
        }
    }
}
