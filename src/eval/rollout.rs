use crate::{
    configuration::{EvaluationMode, SubjectRollout},
    sharder::{Md5Sharder, Sharder},
    EvaluationContext, EvaluationResult, FlagConfiguration, RuleEvaluator,
};

const USER_PRIORITY: i32 = 30;
const TENANT_PRIORITY: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    User,
    Tenant,
}

/// Explicit allow/deny lists and deterministic percentage rollout for users or tenants.
///
/// The deny list always wins, including over the allow list. Subjects outside the rollout
/// percentage are not decided here and fall through to the next evaluator.
#[derive(Debug, Clone, Copy)]
pub struct RolloutEvaluator {
    subject: Subject,
    sharder: Md5Sharder,
}

impl RolloutEvaluator {
    /// Rollout against the user allow/deny lists and user percentage.
    pub fn users() -> Self {
        Self {
            subject: Subject::User,
            sharder: Md5Sharder,
        }
    }

    /// Rollout against the tenant allow/deny lists and tenant percentage.
    pub fn tenants() -> Self {
        Self {
            subject: Subject::Tenant,
            sharder: Md5Sharder,
        }
    }

    fn salt(&self) -> &'static str {
        match self.subject {
            Subject::User => "user",
            Subject::Tenant => "tenant",
        }
    }

    fn subject_id<'a>(&self, context: &'a EvaluationContext) -> Option<&'a str> {
        match self.subject {
            Subject::User => context.user_id(),
            Subject::Tenant => context.tenant_id(),
        }
    }

    fn rollout<'a>(&self, config: &'a FlagConfiguration) -> &'a SubjectRollout {
        match self.subject {
            Subject::User => config.users(),
            Subject::Tenant => config.tenants(),
        }
    }
}

impl RuleEvaluator for RolloutEvaluator {
    fn name(&self) -> &'static str {
        match self.subject {
            Subject::User => "UserRollout",
            Subject::Tenant => "TenantRollout",
        }
    }

    fn priority(&self) -> i32 {
        match self.subject {
            Subject::User => USER_PRIORITY,
            Subject::Tenant => TENANT_PRIORITY,
        }
    }

    fn modes(&self) -> &'static [EvaluationMode] {
        match self.subject {
            Subject::User => &[EvaluationMode::UserTargeted, EvaluationMode::Percentage],
            Subject::Tenant => &[EvaluationMode::Percentage],
        }
    }

    fn can_process(&self, config: &FlagConfiguration, context: &EvaluationContext) -> bool {
        let mode_active = match self.subject {
            Subject::User => {
                config.has_mode(EvaluationMode::UserTargeted)
                    || config.has_mode(EvaluationMode::Percentage)
            }
            Subject::Tenant => config.has_mode(EvaluationMode::Percentage),
        };
        mode_active && self.subject_id(context).is_some()
    }

    fn evaluate(
        &self,
        config: &FlagConfiguration,
        context: &EvaluationContext,
    ) -> Option<EvaluationResult> {
        let subject_id = self.subject_id(context)?;
        let rollout = self.rollout(config);
        let variation = config.default_variation();
        let salt = self.salt();

        if rollout.disabled.contains(subject_id) {
            return Some(EvaluationResult::disabled(
                variation,
                format!("{salt} {subject_id} is explicitly disabled"),
            ));
        }

        if rollout.enabled.contains(subject_id) {
            return Some(EvaluationResult::enabled(
                variation,
                format!("{salt} {subject_id} is explicitly enabled"),
            ));
        }

        if !config.has_mode(EvaluationMode::Percentage) {
            return None;
        }

        let percentage = rollout.percentage();
        let bucket = self.sharder.get_bucket(salt, config.key(), subject_id);
        if bucket < percentage {
            Some(EvaluationResult::enabled(
                variation,
                format!("{salt} {subject_id} is within the {percentage}% rollout"),
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::eval::test_support::flag;

    fn percentage_flag(key: &str, percentage: u8) -> FlagConfiguration {
        flag(key)
            .with_mode(EvaluationMode::Percentage)
            .with_users(SubjectRollout::new().with_percentage(percentage))
    }

    fn enabled_users(config: &FlagConfiguration, population: usize) -> HashSet<String> {
        let evaluator = RolloutEvaluator::users();
        (0..population)
            .map(|i| format!("user-{i}"))
            .filter(|user| {
                let context = EvaluationContext::new().with_user_id(user.as_str());
                evaluator
                    .evaluate(config, &context)
                    .is_some_and(|result| result.is_enabled)
            })
            .collect()
    }

    #[test]
    fn deny_wins_over_allow() {
        let config = flag("beta")
            .with_mode(EvaluationMode::UserTargeted)
            .with_users(SubjectRollout::new().allow("mallory").deny("mallory"));
        let context = EvaluationContext::new().with_user_id("mallory");

        let result = RolloutEvaluator::users().evaluate(&config, &context).unwrap();
        assert!(!result.is_enabled);
    }

    #[test]
    fn allow_list_enables() {
        let config = flag("beta")
            .with_mode(EvaluationMode::UserTargeted)
            .with_users(SubjectRollout::new().allow("alice"));
        let context = EvaluationContext::new().with_user_id("alice");

        let result = RolloutEvaluator::users().evaluate(&config, &context).unwrap();
        assert!(result.is_enabled);
    }

    #[test]
    fn unlisted_user_without_percentage_is_not_applicable() {
        let config = flag("beta")
            .with_mode(EvaluationMode::UserTargeted)
            .with_users(SubjectRollout::new().allow("alice").with_percentage(100));
        let context = EvaluationContext::new().with_user_id("bob");

        assert!(RolloutEvaluator::users().evaluate(&config, &context).is_none());
    }

    #[test]
    fn requires_subject_id() {
        let config = percentage_flag("beta", 50);
        let anonymous = EvaluationContext::new();
        assert!(!RolloutEvaluator::users().can_process(&config, &anonymous));
        assert!(!RolloutEvaluator::tenants().can_process(&config, &anonymous));
    }

    #[test]
    fn tenant_rollout_only_in_percentage_mode() {
        let context = EvaluationContext::new().with_tenant_id("acme");
        let targeted = flag("beta").with_mode(EvaluationMode::UserTargeted);
        assert!(!RolloutEvaluator::tenants().can_process(&targeted, &context));

        let config = flag("beta")
            .with_mode(EvaluationMode::Percentage)
            .with_tenants(SubjectRollout::new().deny("acme").with_percentage(100));
        assert!(RolloutEvaluator::tenants().can_process(&config, &context));
        let result = RolloutEvaluator::tenants().evaluate(&config, &context).unwrap();
        assert!(!result.is_enabled);
    }

    #[test]
    fn zero_and_full_rollout() {
        assert!(enabled_users(&percentage_flag("f", 0), 1_000).is_empty());
        assert_eq!(enabled_users(&percentage_flag("f", 100), 1_000).len(), 1_000);
    }

    #[test]
    fn bucketing_is_deterministic() {
        let config = percentage_flag("checkout", 50);
        assert_eq!(enabled_users(&config, 1_000), enabled_users(&config, 1_000));
    }

    #[test]
    fn bucketing_distribution() {
        let population = 10_000;
        for percentage in [10u8, 25, 50, 75] {
            let enabled = enabled_users(&percentage_flag("distribution", percentage), population);
            let fraction = enabled.len() as f64 / population as f64;
            let expected = f64::from(percentage) / 100.0;
            assert!(
                (fraction - expected).abs() < 0.03,
                "{percentage}%: got {fraction}"
            );
        }
    }

    #[test]
    fn bucketing_is_independent_across_flags() {
        let population = 10_000;
        let a = enabled_users(&percentage_flag("flag-a", 50), population);
        let b = enabled_users(&percentage_flag("flag-b", 50), population);
        let overlap = a.intersection(&b).count() as f64 / population as f64;
        assert!((overlap - 0.25).abs() < 0.03, "overlap {overlap}");
    }

    #[test]
    fn user_and_tenant_salts_differ() {
        let config = flag("salted")
            .with_mode(EvaluationMode::Percentage)
            .with_users(SubjectRollout::new().with_percentage(50))
            .with_tenants(SubjectRollout::new().with_percentage(50));

        let disagreements = (0..1_000)
            .map(|i| format!("id-{i}"))
            .filter(|id| {
                let context = EvaluationContext::new()
                    .with_user_id(id.as_str())
                    .with_tenant_id(id.as_str());
                let user = RolloutEvaluator::users().evaluate(&config, &context).is_some();
                let tenant = RolloutEvaluator::tenants().evaluate(&config, &context).is_some();
                user != tenant
            })
            .count();
        assert!(disagreements > 300, "disagreements {disagreements}");
    }
}
