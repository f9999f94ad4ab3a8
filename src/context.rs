use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Attributes of the subject being evaluated, keyed by attribute name.
///
/// # Examples
/// ```
/// # use switchboard::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("beta_tester".to_owned(), true.into()),
///     ("plan".to_owned(), "enterprise".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Value of a single context attribute.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
    /// An explicit null, treated the same as an absent attribute by `IsNull`.
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Render the value the way string operators compare it.
    pub(crate) fn to_comparable_string(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Number(n) => Some(n.to_string()),
            AttributeValue::Boolean(b) => Some(b.to_string()),
            AttributeValue::Null => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// Request-time inputs to a flag evaluation.
///
/// A context is built once per request and never mutated afterwards: evaluators only ever see it
/// through a shared reference. The evaluation instant is captured at construction so evaluating
/// the same context twice yields the same result.
///
/// ```
/// # use switchboard::EvaluationContext;
/// let context = EvaluationContext::new()
///     .with_user_id("user-42")
///     .with_tenant_id("acme")
///     .with_attribute("plan", "enterprise");
/// assert_eq!(context.user_id(), Some("user-42"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    user_id: Option<String>,
    tenant_id: Option<String>,
    attributes: Attributes,
    time_zone: Option<Tz>,
    timestamp: DateTime<Utc>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        EvaluationContext {
            user_id: None,
            tenant_id: None,
            attributes: Attributes::new(),
            time_zone: None,
            timestamp: Utc::now(),
        }
    }
}

impl EvaluationContext {
    /// Create an empty context evaluated at the current instant.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = Some(time_zone);
        self
    }

    /// Set the time zone from an IANA name (e.g., `"Europe/Berlin"`).
    ///
    /// Fails with [`Error::InvalidContext`] if the name is unknown.
    pub fn try_with_time_zone(self, name: &str) -> Result<Self> {
        let time_zone = name
            .parse::<Tz>()
            .map_err(|_| Error::InvalidContext(format!("unknown time zone {name:?}")))?;
        Ok(self.with_time_zone(time_zone))
    }

    /// Evaluate at `timestamp` instead of the construction instant.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn time_zone(&self) -> Option<Tz> {
        self.time_zone
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn builds_context() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let context = EvaluationContext::new()
            .with_user_id("alice")
            .with_tenant_id("acme")
            .with_attribute("age", 30.0)
            .with_attribute("plan", "enterprise")
            .at(now);

        assert_eq!(context.user_id(), Some("alice"));
        assert_eq!(context.tenant_id(), Some("acme"));
        assert_eq!(context.attribute("age"), Some(&AttributeValue::Number(30.0)));
        assert_eq!(context.attribute("plan").and_then(|v| v.as_str()), Some("enterprise"));
        assert_eq!(context.timestamp(), now);
    }

    #[test]
    fn parses_time_zone() {
        let context = EvaluationContext::new()
            .try_with_time_zone("Europe/Berlin")
            .unwrap();
        assert_eq!(context.time_zone(), Some(chrono_tz::Europe::Berlin));

        assert!(matches!(
            EvaluationContext::new().try_with_time_zone("Mars/Olympus"),
            Err(Error::InvalidContext(_))
        ));
    }

    #[test]
    fn attribute_values_deserialize_untagged() {
        let attributes: Attributes =
            serde_json::from_str(r#"{"name": "bob", "age": 42, "admin": false, "team": null}"#)
                .unwrap();
        assert_eq!(attributes["name"], AttributeValue::String("bob".into()));
        assert_eq!(attributes["age"], AttributeValue::Number(42.0));
        assert_eq!(attributes["admin"], AttributeValue::Boolean(false));
        assert_eq!(attributes["team"], AttributeValue::Null);
    }
}
