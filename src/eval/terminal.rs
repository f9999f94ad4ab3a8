use crate::{
    configuration::EvaluationMode, EvaluationContext, EvaluationResult, FlagConfiguration,
    RuleEvaluator,
};

/// Global kill switch and catch-all for flags in a plain On/Off state.
///
/// Runs before every other evaluator, so an Off or expired flag short-circuits the whole pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalStateEvaluator;

impl TerminalStateEvaluator {
    pub const PRIORITY: i32 = 0;
}

impl RuleEvaluator for TerminalStateEvaluator {
    fn name(&self) -> &'static str {
        "Terminal"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_process(&self, config: &FlagConfiguration, context: &EvaluationContext) -> bool {
        config.has_mode(EvaluationMode::Off)
            || !config.has_active_concern()
            || config.retention().is_expired(context.timestamp())
    }

    fn evaluate(
        &self,
        config: &FlagConfiguration,
        context: &EvaluationContext,
    ) -> Option<EvaluationResult> {
        let variation = config.default_variation();

        if config.has_mode(EvaluationMode::Off) {
            return Some(EvaluationResult::disabled(variation, "flag is switched off"));
        }

        if config.retention().is_expired(context.timestamp()) {
            let reason = match config.retention().expiration_date {
                Some(expiration) => format!("flag expired on {}", expiration.to_rfc3339()),
                None => "flag expired".to_owned(),
            };
            return Some(EvaluationResult::disabled(variation, reason));
        }

        if config.has_mode(EvaluationMode::On) {
            return Some(EvaluationResult::enabled(variation, "flag is switched on"));
        }

        Some(EvaluationResult::disabled(
            variation,
            "no evaluation mode configured",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration::RetentionPolicy,
        eval::test_support::{context_at, flag, utc},
    };

    #[test]
    fn switched_off() {
        let config = flag("a").with_mode(EvaluationMode::Off);
        let context = context_at(utc(2024, 1, 1, 0, 0));

        assert!(TerminalStateEvaluator.can_process(&config, &context));
        let result = TerminalStateEvaluator.evaluate(&config, &context).unwrap();
        assert!(!result.is_enabled);
        assert_eq!(result.variation, "on");
    }

    #[test]
    fn switched_on() {
        let config = flag("a")
            .with_mode(EvaluationMode::On)
            .with_default_variation("blue");
        let context = context_at(utc(2024, 1, 1, 0, 0));

        let result = TerminalStateEvaluator.evaluate(&config, &context).unwrap();
        assert_eq!(result, EvaluationResult::enabled("blue", "flag is switched on"));
    }

    #[test]
    fn steps_aside_when_another_concern_is_active() {
        let config = flag("a")
            .with_mode(EvaluationMode::On)
            .with_mode(EvaluationMode::Scheduled);
        let context = context_at(utc(2024, 1, 1, 0, 0));
        assert!(!TerminalStateEvaluator.can_process(&config, &context));
    }

    #[test]
    fn off_applies_even_with_other_concerns() {
        let config = flag("a")
            .with_mode(EvaluationMode::Off)
            .with_mode(EvaluationMode::UserTargeted);
        let context = context_at(utc(2024, 1, 1, 0, 0));
        assert!(TerminalStateEvaluator.can_process(&config, &context));
    }

    #[test]
    fn expired_flag_is_disabled() {
        let config = flag("a")
            .with_mode(EvaluationMode::On)
            .with_mode(EvaluationMode::Percentage)
            .with_retention(RetentionPolicy::expiring_at(utc(2024, 1, 1, 0, 0)));
        let context = context_at(utc(2024, 3, 1, 0, 0));

        assert!(TerminalStateEvaluator.can_process(&config, &context));
        let result = TerminalStateEvaluator.evaluate(&config, &context).unwrap();
        assert!(!result.is_enabled);
        assert!(result.reason.starts_with("flag expired"));
    }

    #[test]
    fn permanent_flag_never_expires() {
        let config = flag("a").with_mode(EvaluationMode::On).with_retention(RetentionPolicy {
            expiration_date: Some(utc(2024, 1, 1, 0, 0)),
            permanent: true,
        });
        let context = context_at(utc(2024, 3, 1, 0, 0));

        let result = TerminalStateEvaluator.evaluate(&config, &context).unwrap();
        assert!(result.is_enabled);
    }

    #[test]
    fn empty_mode_set_is_off() {
        let config = flag("a");
        let context = context_at(utc(2024, 1, 1, 0, 0));

        assert!(TerminalStateEvaluator.can_process(&config, &context));
        assert!(!TerminalStateEvaluator.evaluate(&config, &context).unwrap().is_enabled);
    }
}
