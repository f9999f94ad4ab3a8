//! Stored flag configuration, as loaded from the repository or the cache.
//!
//! A [`FlagConfiguration`] is an immutable snapshot. The engine shares it across concurrent
//! evaluations behind an [`Arc`](std::sync::Arc); only the management layer produces new ones.
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{
    rules::TargetingRule,
    FlagIdentity, FlagScope, Result,
};

/// An evaluation concern that can be active on a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationMode {
    /// Terminal state: the flag is switched off (kill switch).
    Off,
    /// Terminal state: the flag is switched on.
    On,
    Scheduled,
    TimeWindow,
    UserTargeted,
    Percentage,
}

impl EvaluationMode {
    pub fn is_terminal(self) -> bool {
        matches!(self, EvaluationMode::On | EvaluationMode::Off)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagConfiguration {
    pub(crate) key: String,
    #[serde(default)]
    pub(crate) scope: FlagScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
    #[serde(default)]
    pub(crate) modes: BTreeSet<EvaluationMode>,
    #[serde(default)]
    pub(crate) schedule: ActivationSchedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) window: Option<OperationalWindow>,
    #[serde(default)]
    pub(crate) targeting_rules: Vec<TargetingRule>,
    #[serde(default)]
    pub(crate) users: SubjectRollout,
    #[serde(default)]
    pub(crate) tenants: SubjectRollout,
    /// Variation values keyed by variation name.
    #[serde(default)]
    pub(crate) variations: HashMap<String, serde_json::Value>,
    #[serde(default = "default_variation")]
    pub(crate) default_variation: String,
    #[serde(default)]
    pub(crate) retention: RetentionPolicy,
}

fn default_variation() -> String {
    FlagConfiguration::DEFAULT_VARIATION.to_owned()
}

impl FlagConfiguration {
    /// Name of the default variation when none is configured.
    pub const DEFAULT_VARIATION: &'static str = "on";

    /// Create a flag with no active mode. Such a flag evaluates as switched off until a mode is
    /// added.
    pub fn new(identity: FlagIdentity) -> Self {
        let (key, scope) = (identity.key().to_owned(), identity.scope().clone());
        FlagConfiguration {
            key,
            scope,
            description: None,
            tags: Vec::new(),
            modes: BTreeSet::new(),
            schedule: ActivationSchedule::default(),
            window: None,
            targeting_rules: Vec::new(),
            users: SubjectRollout::default(),
            tenants: SubjectRollout::default(),
            variations: HashMap::new(),
            default_variation: default_variation(),
            retention: RetentionPolicy::default(),
        }
    }

    /// Create a global flag in a plain terminal state.
    pub fn global(key: impl Into<String>, enabled: bool) -> Result<Self> {
        let mode = if enabled {
            EvaluationMode::On
        } else {
            EvaluationMode::Off
        };
        Ok(FlagConfiguration::new(FlagIdentity::global(key)?).with_mode(mode))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.modes.insert(mode);
        self
    }

    pub fn without_mode(mut self, mode: EvaluationMode) -> Self {
        self.modes.remove(&mode);
        self
    }

    pub fn with_schedule(mut self, schedule: ActivationSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_window(mut self, window: OperationalWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Append a targeting rule. Rules are evaluated in insertion order.
    pub fn with_rule(mut self, rule: TargetingRule) -> Self {
        self.targeting_rules.push(rule);
        self
    }

    pub fn with_users(mut self, users: SubjectRollout) -> Self {
        self.users = users;
        self
    }

    pub fn with_tenants(mut self, tenants: SubjectRollout) -> Self {
        self.tenants = tenants;
        self
    }

    pub fn with_variation(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variations.insert(name.into(), value);
        self
    }

    pub fn with_default_variation(mut self, name: impl Into<String>) -> Self {
        self.default_variation = name.into();
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn scope(&self) -> &FlagScope {
        &self.scope
    }

    pub fn identity(&self) -> Result<FlagIdentity> {
        FlagIdentity::new(self.key.clone(), self.scope.clone())
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn modes(&self) -> &BTreeSet<EvaluationMode> {
        &self.modes
    }

    pub fn has_mode(&self, mode: EvaluationMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Return `true` if any non-terminal concern is active.
    pub fn has_active_concern(&self) -> bool {
        self.modes.iter().any(|mode| !mode.is_terminal())
    }

    pub fn schedule(&self) -> &ActivationSchedule {
        &self.schedule
    }

    pub fn window(&self) -> Option<&OperationalWindow> {
        self.window.as_ref()
    }

    pub fn targeting_rules(&self) -> &[TargetingRule] {
        &self.targeting_rules
    }

    pub fn users(&self) -> &SubjectRollout {
        &self.users
    }

    pub fn tenants(&self) -> &SubjectRollout {
        &self.tenants
    }

    pub fn variations(&self) -> &HashMap<String, serde_json::Value> {
        &self.variations
    }

    pub fn variation(&self, name: &str) -> Option<&serde_json::Value> {
        self.variations.get(name)
    }

    pub fn default_variation(&self) -> &str {
        &self.default_variation
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }
}

/// Optional activation and deactivation instants (UTC).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationSchedule {
    #[serde(default)]
    pub enable_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disable_on: Option<DateTime<Utc>>,
}

impl ActivationSchedule {
    pub fn new(enable_on: Option<DateTime<Utc>>, disable_on: Option<DateTime<Utc>>) -> Self {
        Self {
            enable_on,
            disable_on,
        }
    }
}

/// Recurring time-of-day window on selected weekdays.
///
/// The window covers `[start, stop)`. When `start > stop` it spans midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalWindow {
    pub start: NaiveTime,
    pub stop: NaiveTime,
    /// Falls back to the context's time zone, then to the client default.
    #[serde(default)]
    pub time_zone: Option<Tz>,
    #[serde(default = "all_weekdays")]
    pub weekdays: BTreeSet<WeekdayKey>,
}

fn all_weekdays() -> BTreeSet<WeekdayKey> {
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .map(WeekdayKey)
    .collect()
}

impl OperationalWindow {
    /// A window active every day between `start` and `stop`.
    pub fn new(start: NaiveTime, stop: NaiveTime) -> Self {
        Self {
            start,
            stop,
            time_zone: None,
            weekdays: all_weekdays(),
        }
    }

    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = Some(time_zone);
        self
    }

    pub fn with_weekdays(mut self, weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        self.weekdays = weekdays.into_iter().map(WeekdayKey).collect();
        self
    }

    pub fn is_active_on(&self, weekday: Weekday) -> bool {
        self.weekdays.contains(&WeekdayKey(weekday))
    }

    /// Return `true` if `time` falls inside the window, ignoring weekdays.
    pub fn contains_time(&self, time: NaiveTime) -> bool {
        if self.start <= self.stop {
            time >= self.start && time < self.stop
        } else {
            time >= self.start || time < self.stop
        }
    }
}

/// [`Weekday`] ordered Monday first, so it can live in an ordered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekdayKey(pub Weekday);

impl PartialOrd for WeekdayKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WeekdayKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .num_days_from_monday()
            .cmp(&other.0.num_days_from_monday())
    }
}

/// Explicit allow/deny lists plus a rollout percentage for one kind of subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRollout {
    #[serde(default)]
    pub enabled: BTreeSet<String>,
    #[serde(default)]
    pub disabled: BTreeSet<String>,
    /// Percentage in `[0, 100]`. Stored values outside the range are clamped when loaded.
    #[serde(default, deserialize_with = "clamped_percentage")]
    pub percentage: u8,
}

fn clamped_percentage<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    Ok(value.clamp(0, 100) as u8)
}

impl SubjectRollout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.percentage = percentage.min(100);
        self
    }

    pub fn allow(mut self, subject_id: impl Into<String>) -> Self {
        self.enabled.insert(subject_id.into());
        self
    }

    pub fn deny(mut self, subject_id: impl Into<String>) -> Self {
        self.disabled.insert(subject_id.into());
        self
    }

    pub fn percentage(&self) -> u64 {
        u64::from(self.percentage.min(100))
    }
}

/// Retention metadata: a flag past its expiration date is treated as switched off unless it is
/// permanent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub permanent: bool,
}

impl RetentionPolicy {
    pub fn expiring_at(expiration_date: DateTime<Utc>) -> Self {
        Self {
            expiration_date: Some(expiration_date),
            permanent: false,
        }
    }

    pub fn permanent() -> Self {
        Self {
            expiration_date: None,
            permanent: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.permanent && matches!(self.expiration_date, Some(expiration) if now > expiration)
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
