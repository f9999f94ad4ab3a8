use std::collections::BTreeSet;

use chrono_tz::Tz;

use crate::{
    configuration::EvaluationMode,
    eval::{
        OperationalWindowEvaluator, RolloutEvaluator, ScheduleEvaluator, TargetingEvaluator,
        TerminalStateEvaluator,
    },
    EvaluationContext, EvaluationResult, FlagConfiguration, RuleEvaluator,
};

/// Reason reported when no evaluator had an opinion about the flag.
pub(crate) const NO_MATCH_REASON: &str = "no active evaluation mode matched";

/// Composes the rule evaluators into a single pipeline.
///
/// Evaluators are sorted by priority once, at construction. Every applicable concern must agree
/// that the flag is enabled: the first disabled result is returned as is.
///
/// Each active mode must also be satisfied by at least one of the evaluators deciding it. A mode
/// whose evaluators all abstained (a subject outside the rollout, no matching targeting rule)
/// disables the flag even when other modes enabled it.
pub struct EvaluationManager {
    evaluators: Vec<Box<dyn RuleEvaluator>>,
}

impl EvaluationManager {
    /// Create a manager from an arbitrary set of evaluators. Evaluators with equal priority keep
    /// their relative order.
    pub fn new(mut evaluators: Vec<Box<dyn RuleEvaluator>>) -> Self {
        evaluators.sort_by_key(|evaluator| evaluator.priority());
        Self { evaluators }
    }

    /// The standard pipeline: kill switch, schedule, operational window, user rollout, tenant
    /// rollout and targeting rules.
    pub fn with_default_evaluators(default_time_zone: Tz) -> Self {
        Self::new(vec![
            Box::new(TerminalStateEvaluator),
            Box::new(ScheduleEvaluator),
            Box::new(OperationalWindowEvaluator::new(default_time_zone)),
            Box::new(RolloutEvaluator::users()),
            Box::new(RolloutEvaluator::tenants()),
            Box::new(TargetingEvaluator),
        ])
    }

    /// Evaluators in the order they run.
    pub fn evaluators(&self) -> impl Iterator<Item = &dyn RuleEvaluator> {
        self.evaluators.iter().map(|evaluator| evaluator.as_ref())
    }

    /// Run the pipeline. Always produces a concrete result.
    pub fn process_evaluation(
        &self,
        config: &FlagConfiguration,
        context: &EvaluationContext,
    ) -> EvaluationResult {
        let mut satisfied: Vec<(&'static str, EvaluationResult)> = Vec::new();
        let mut settled: BTreeSet<EvaluationMode> = BTreeSet::new();

        for evaluator in self
            .evaluators
            .iter()
            .filter(|evaluator| evaluator.can_process(config, context))
        {
            let Some(result) = evaluator.evaluate(config, context) else {
                continue;
            };
            if !result.is_enabled {
                log::trace!(target: "switchboard",
                    flag_key = config.key(),
                    evaluator = evaluator.name();
                    "evaluation short-circuited: {}", result.reason);
                return result;
            }
            settled.extend(
                evaluator
                    .modes()
                    .iter()
                    .copied()
                    .filter(|mode| config.has_mode(*mode)),
            );
            satisfied.push((evaluator.name(), result));
        }

        if !satisfied.is_empty() {
            if let Some(mode) = self
                .decided_modes(config)
                .find(|mode| !settled.contains(mode))
            {
                log::trace!(target: "switchboard",
                    flag_key = config.key(),
                    mode:serde = mode;
                    "active mode not satisfied");
                return EvaluationResult::disabled(
                    config.default_variation(),
                    format!("no match for active mode {mode:?}"),
                );
            }
        }

        match satisfied.as_slice() {
            [] => EvaluationResult::disabled(config.default_variation(), NO_MATCH_REASON),
            [(_, only)] => only.clone(),
            [.., (_, last)] => {
                let names = satisfied
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", ");
                EvaluationResult::enabled(
                    last.variation.clone(),
                    format!("all active modes satisfied: {names}"),
                )
            }
        }
    }

    /// Active modes of `config` that at least one evaluator of this pipeline decides.
    fn decided_modes<'a>(
        &'a self,
        config: &'a FlagConfiguration,
    ) -> impl Iterator<Item = EvaluationMode> + 'a {
        config.modes().iter().copied().filter(move |mode| {
            self.evaluators
                .iter()
                .any(|evaluator| evaluator.modes().contains(mode))
        })
    }
}

impl Default for EvaluationManager {
    fn default() -> Self {
        Self::with_default_evaluators(Tz::UTC)
    }
}

impl std::fmt::Debug for EvaluationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.evaluators.iter().map(|evaluator| evaluator.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::{
        configuration::{ActivationSchedule, EvaluationMode, OperationalWindow, SubjectRollout},
        eval::test_support::{context_at, flag, utc},
        rules::{Operator, TargetingRule},
    };

    fn manager() -> EvaluationManager {
        EvaluationManager::default()
    }

    fn always_open_window() -> OperationalWindow {
        OperationalWindow::new(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        )
    }

    fn vip_rule() -> TargetingRule {
        TargetingRule::new("tier", Operator::Equals, vec!["vip".into()], "gold")
    }

    #[test]
    fn evaluators_run_in_priority_order() {
        let manager = EvaluationManager::new(vec![
            Box::new(TargetingEvaluator),
            Box::new(RolloutEvaluator::tenants()),
            Box::new(TerminalStateEvaluator),
            Box::new(OperationalWindowEvaluator::default()),
            Box::new(RolloutEvaluator::users()),
            Box::new(ScheduleEvaluator),
        ]);
        let names = manager.evaluators().map(|e| e.name()).collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "Terminal",
                "Scheduled",
                "TimeWindow",
                "UserRollout",
                "TenantRollout",
                "UserTargeted"
            ]
        );
    }

    #[test]
    fn kill_switch_overrides_everything() {
        let config = flag("checkout")
            .with_mode(EvaluationMode::Off)
            .with_mode(EvaluationMode::Scheduled)
            .with_mode(EvaluationMode::TimeWindow)
            .with_mode(EvaluationMode::UserTargeted)
            .with_schedule(ActivationSchedule::new(Some(utc(2020, 1, 1, 0, 0)), None))
            .with_window(always_open_window())
            .with_users(SubjectRollout::new().allow("alice"))
            .with_rule(vip_rule());
        let context = context_at(utc(2024, 1, 2, 12, 0))
            .with_user_id("alice")
            .with_attribute("tier", "vip");

        let result = manager().process_evaluation(&config, &context);
        assert!(!result.is_enabled);
        assert_eq!(result.reason, "flag is switched off");
    }

    #[test]
    fn first_disabled_result_wins() {
        let config = flag("launch")
            .with_mode(EvaluationMode::Scheduled)
            .with_mode(EvaluationMode::UserTargeted)
            .with_schedule(ActivationSchedule::new(Some(utc(2030, 1, 1, 0, 0)), None))
            .with_users(SubjectRollout::new().allow("alice"));
        let context = context_at(utc(2024, 1, 2, 12, 0)).with_user_id("alice");

        let result = manager().process_evaluation(&config, &context);
        assert!(!result.is_enabled);
        assert!(result.reason.starts_with("scheduled to enable on"));
    }

    #[test]
    fn combined_result_names_satisfied_modes() {
        let config = flag("launch")
            .with_mode(EvaluationMode::Scheduled)
            .with_mode(EvaluationMode::UserTargeted)
            .with_schedule(ActivationSchedule::new(Some(utc(2020, 1, 1, 0, 0)), None))
            .with_rule(vip_rule());
        let context = context_at(utc(2024, 1, 2, 12, 0)).with_attribute("tier", "vip");

        let result = manager().process_evaluation(&config, &context);
        assert!(result.is_enabled);
        assert_eq!(result.variation, "gold");
        assert_eq!(result.reason, "all active modes satisfied: Scheduled, UserTargeted");
    }

    #[test]
    fn single_applicable_result_is_returned_unchanged() {
        let config = flag("launch")
            .with_mode(EvaluationMode::Scheduled)
            .with_schedule(ActivationSchedule::new(Some(utc(2020, 1, 1, 0, 0)), None));
        let context = context_at(utc(2024, 1, 2, 12, 0));

        let result = manager().process_evaluation(&config, &context);
        assert_eq!(result, ScheduleEvaluator.evaluate(&config, &context).unwrap());
    }

    #[test]
    fn nothing_applicable_defaults_to_disabled() {
        let config = flag("empty-targeting")
            .with_mode(EvaluationMode::UserTargeted)
            .with_default_variation("control")
            .with_users(SubjectRollout::new().allow("alice").deny("mallory"));
        let context = context_at(utc(2024, 1, 2, 12, 0)).with_user_id("bob");

        let result = manager().process_evaluation(&config, &context);
        assert_eq!(
            result,
            EvaluationResult::disabled("control", "no active evaluation mode matched")
        );
    }

    #[test]
    fn zero_percent_rollout_is_not_bypassed_by_schedule() {
        let config = flag("checkout")
            .with_mode(EvaluationMode::Scheduled)
            .with_mode(EvaluationMode::Percentage)
            .with_schedule(ActivationSchedule::new(Some(utc(2020, 1, 1, 0, 0)), None))
            .with_users(SubjectRollout::new().with_percentage(0));

        for i in 0..1000 {
            let context = context_at(utc(2024, 1, 2, 12, 0)).with_user_id(format!("user-{i}"));
            let result = manager().process_evaluation(&config, &context);
            assert!(!result.is_enabled, "user-{i} enabled: {}", result.reason);
            assert_eq!(result.reason, "no match for active mode Percentage");
        }
    }

    #[test]
    fn unmatched_targeting_is_not_bypassed_by_window() {
        let config = flag("vip-lounge")
            .with_mode(EvaluationMode::TimeWindow)
            .with_mode(EvaluationMode::UserTargeted)
            .with_default_variation("control")
            .with_window(always_open_window())
            .with_rule(vip_rule());
        let now = utc(2024, 1, 2, 12, 0);

        let free = context_at(now).with_attribute("tier", "free");
        assert_eq!(
            manager().process_evaluation(&config, &free),
            EvaluationResult::disabled("control", "no match for active mode UserTargeted")
        );

        let vip = context_at(now).with_attribute("tier", "vip");
        let result = manager().process_evaluation(&config, &vip);
        assert!(result.is_enabled);
        assert_eq!(result.variation, "gold");
    }

    #[test]
    fn allow_list_or_rule_satisfies_user_targeting() {
        let config = flag("launch")
            .with_mode(EvaluationMode::Scheduled)
            .with_mode(EvaluationMode::UserTargeted)
            .with_schedule(ActivationSchedule::new(Some(utc(2020, 1, 1, 0, 0)), None))
            .with_users(SubjectRollout::new().allow("alice"))
            .with_rule(vip_rule());
        let context = context_at(utc(2024, 1, 2, 12, 0))
            .with_user_id("alice")
            .with_attribute("tier", "free");

        let result = manager().process_evaluation(&config, &context);
        assert!(result.is_enabled);
        assert_eq!(result.reason, "all active modes satisfied: Scheduled, UserRollout");
    }

    #[test]
    fn tenant_bucket_satisfies_percentage_for_out_of_bucket_user() {
        let config = flag("tenant-pilot")
            .with_mode(EvaluationMode::Scheduled)
            .with_mode(EvaluationMode::Percentage)
            .with_schedule(ActivationSchedule::new(Some(utc(2020, 1, 1, 0, 0)), None))
            .with_tenants(SubjectRollout::new().allow("acme"));
        let context = context_at(utc(2024, 1, 2, 12, 0))
            .with_user_id("bob")
            .with_tenant_id("acme");

        let result = manager().process_evaluation(&config, &context);
        assert!(result.is_enabled);
        assert_eq!(result.reason, "all active modes satisfied: Scheduled, TenantRollout");
    }

    #[test]
    fn evaluation_is_deterministic() {
        let config = flag("checkout")
            .with_mode(EvaluationMode::Percentage)
            .with_users(SubjectRollout::new().with_percentage(50));
        let context = context_at(utc(2024, 1, 2, 12, 0)).with_user_id("user-42");

        let first = manager().process_evaluation(&config, &context);
        for _ in 0..10 {
            assert_eq!(manager().process_evaluation(&config, &context), first);
        }
    }

    #[test]
    fn plain_on_flag_is_enabled() {
        let config = flag("banner").with_mode(EvaluationMode::On);
        let result = manager().process_evaluation(&config, &EvaluationContext::new());
        assert_eq!(result, EvaluationResult::enabled("on", "flag is switched on"));
    }
}
