//! Feature flag evaluation engine.
//!
//! # Overview
//!
//! A [`Client`] decides whether a feature flag is enabled for an [`EvaluationContext`] (user,
//! tenant, attributes and evaluation time) and which variation applies. Flag configurations are
//! read from a [`FlagRepository`] and kept in a [`ConfigurationCache`] keyed by the flag's
//! scoped identity, so flags with the same key in different applications or application versions
//! never collide.
//!
//! Evaluation runs a fixed pipeline of rule evaluators, ordered by priority:
//!
//! 1. terminal state (kill switch, expiry, plain On/Off),
//! 2. activation schedule,
//! 3. operational time window,
//! 4. user allow/deny lists and percentage rollout,
//! 5. tenant allow/deny lists and percentage rollout,
//! 6. attribute targeting rules.
//!
//! Every applicable evaluator must agree that the flag is enabled; the first one to disable it
//! decides. Each active mode also needs a match: a 0% rollout or an unmatched targeting rule keeps
//! a scheduled flag disabled. When no evaluator applies, the flag is disabled with its default
//! variation.
//!
//! Percentage rollouts are deterministic: a subject always lands in the same bucket for a given
//! flag key, and buckets for different flags are independent.
//!
//! # Managing flags
//!
//! Writes go through [`FlagAdmin`], which invalidates the cached configuration before returning.
//! The evaluation path never writes.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. A missing flag is reported as
//! [`Error::FlagNotFound`] rather than silently defaulted. Cache backend failures are never
//! surfaced: they are logged and the configuration is fetched from the repository.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with target
//! `"switchboard"`. Consider integrating a `log`-compatible logger implementation for visibility
//! into cache and repository behavior.

#![warn(rustdoc::missing_crate_level_docs)]

mod admin;
pub mod cache;
mod client;
mod config;
mod configuration;
mod context;
mod error;
pub mod eval;
mod identity;
mod repository;
mod rules;
mod sharder;

pub use admin::FlagAdmin;
#[cfg(feature = "redis")]
pub use cache::RedisCache;
pub use cache::{CacheConfig, ConfigurationCache, InMemoryCache};
pub use client::Client;
pub use config::ClientConfig;
pub use configuration::{
    ActivationSchedule, EvaluationMode, FlagConfiguration, OperationalWindow, RetentionPolicy,
    SubjectRollout, TryParse,
};
pub use context::{AttributeValue, Attributes, EvaluationContext};
pub use error::{Error, Result};
pub use eval::{EvaluationManager, EvaluationResult, RuleEvaluator};
pub use identity::{CacheKey, FlagIdentity, FlagScope};
pub use repository::{FlagRepository, InMemoryRepository};
pub use rules::{Operator, RuleValue, TargetingRule};
pub use sharder::{Md5Sharder, Sharder};
