//! The rule pipeline: independent evaluators, each owning one evaluation concern, composed by the
//! [`EvaluationManager`].
//!
//! Evaluation is pure computation. Evaluators hold no mutable state, read the configuration and
//! context through shared references, and never fail: a concern either produces an
//! [`EvaluationResult`] or declares itself not applicable.
mod evaluator;
mod manager;
mod rollout;
mod schedule;
mod targeting;
mod terminal;
mod window;

pub use evaluator::{EvaluationResult, RuleEvaluator};
pub use manager::EvaluationManager;
pub use rollout::RolloutEvaluator;
pub use schedule::ScheduleEvaluator;
pub use targeting::TargetingEvaluator;
pub use terminal::TerminalStateEvaluator;
pub use window::OperationalWindowEvaluator;


#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fs, fs::File};

    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    use super::*;
    use crate::{Attributes, EvaluationContext, FlagConfiguration, TryParse};

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct TestFile {
        flag: String,
        subjects: Vec<TestSubject>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct TestSubject {
        timestamp: DateTime<Utc>,
        user_id: Option<String>,
        tenant_id: Option<String>,
        #[serde(default)]
        attributes: Attributes,
        time_zone: Option<String>,
        is_enabled: bool,
        variation: String,
    }

    impl TestSubject {
        fn context(&self) -> EvaluationContext {
            let mut context = EvaluationContext::new()
                .at(self.timestamp)
                .with_attributes(self.attributes.clone());
            if let Some(user_id) = &self.user_id {
                context = context.with_user_id(user_id.as_str());
            }
            if let Some(tenant_id) = &self.tenant_id {
                context = context.with_tenant_id(tenant_id.as_str());
            }
            if let Some(time_zone) = &self.time_zone {
                context = context.try_with_time_zone(time_zone).unwrap();
            }
            context
        }
    }

    fn load_flags() -> HashMap<String, FlagConfiguration> {
        let flags: Vec<TryParse<FlagConfiguration>> =
            serde_json::from_reader(File::open("tests/data/flags.json").unwrap()).unwrap();
        flags
            .into_iter()
            .filter_map(Option::from)
            .map(|flag: FlagConfiguration| (flag.key().to_owned(), flag))
            .collect()
    }

    #[test]
    fn evaluation_test_data() {
        let flags = load_flags();
        let manager = EvaluationManager::default();

        for entry in fs::read_dir("tests/data/cases/").unwrap() {
            let entry = entry.unwrap();
            println!("Processing test file: {:?}", entry.path());

            let test_file: TestFile =
                serde_json::from_reader(File::open(entry.path()).unwrap()).unwrap();
            let config = &flags[&test_file.flag];

            for subject in test_file.subjects {
                print!("test subject {:?} at {} ... ", subject.user_id, subject.timestamp);
                let result = manager.process_evaluation(config, &subject.context());
                assert_eq!(
                    (result.is_enabled, result.variation.as_str()),
                    (subject.is_enabled, subject.variation.as_str()),
                    "{}: {}",
                    test_file.flag,
                    result.reason
                );
                println!("ok");
            }
        }
    }
}
