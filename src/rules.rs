use derive_more::From;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{AttributeValue, Attributes};

/// A single attribute-match condition that maps matching subjects to a variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetingRule {
    pub attribute: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<RuleValue>,
    pub variation: String,
}

impl TargetingRule {
    pub fn new(
        attribute: impl Into<String>,
        operator: Operator,
        values: Vec<RuleValue>,
        variation: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            values,
            variation: variation.into(),
        }
    }

    /// Return `true` if the subject's attributes satisfy the rule.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.operator
            .eval(attributes.get(&self.attribute), &self.values)
    }
}

/// Value a rule compares against.
///
/// Untagged so that stored rules can list plain JSON strings, numbers and booleans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum RuleValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl RuleValue {
    fn to_comparable_string(&self) -> String {
        match self {
            RuleValue::Boolean(b) => b.to_string(),
            RuleValue::Number(n) => n.to_string(),
            RuleValue::String(s) => s.clone(),
        }
    }

    fn to_number(&self) -> Option<f64> {
        match self {
            RuleValue::Number(n) => Some(*n),
            RuleValue::String(s) => s.trim().parse().ok(),
            RuleValue::Boolean(_) => None,
        }
    }
}

impl From<&str> for RuleValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    NotMatches,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    #[serde(rename = "SEMVER_GREATER_THAN")]
    SemVerGreaterThan,
    #[serde(rename = "SEMVER_LESS_THAN")]
    SemVerLessThan,
    #[serde(rename = "SEMVER_EQUALS")]
    SemVerEquals,
    IsNull,
}

impl Operator {
    /// Applying `Operator` to the values. Returns `false` if the operator cannot be applied or
    /// there's a misconfiguration.
    pub fn eval(&self, attribute: Option<&AttributeValue>, values: &[RuleValue]) -> bool {
        self.try_eval(attribute, values).unwrap_or(false)
    }

    /// Try applying `Operator` to the values, returning `None` if the operator cannot be applied.
    fn try_eval(&self, attribute: Option<&AttributeValue>, values: &[RuleValue]) -> Option<bool> {
        match self {
            Self::Equals | Self::NotEquals => {
                let s = attribute?.to_comparable_string()?;
                let [value] = values else {
                    return None;
                };
                let equal = value.to_comparable_string() == s;
                Some(equal == (*self == Self::Equals))
            }

            Self::In | Self::NotIn => {
                let s = attribute?.to_comparable_string()?;
                if values.is_empty() {
                    return None;
                }
                let is_one_of = values.iter().any(|v| v.to_comparable_string() == s);
                Some(is_one_of == (*self == Self::In))
            }

            Self::Contains | Self::StartsWith | Self::EndsWith => {
                let s = attribute?.to_comparable_string()?;
                if values.is_empty() {
                    return None;
                }
                Some(values.iter().any(|v| {
                    let v = v.to_comparable_string();
                    match self {
                        Self::Contains => s.contains(&v),
                        Self::StartsWith => s.starts_with(&v),
                        _ => s.ends_with(&v),
                    }
                }))
            }

            Self::Matches | Self::NotMatches => {
                let s = attribute?.as_str()?;
                let [RuleValue::String(pattern)] = values else {
                    return None;
                };
                let regex = match Regex::new(pattern) {
                    Ok(regex) => regex,
                    Err(err) => {
                        log::warn!(target: "switchboard",
                                   pattern:display = pattern;
                                   "invalid regex in targeting rule: {}", err);
                        return None;
                    }
                };
                Some(regex.is_match(s) == (*self == Self::Matches))
            }

            Self::GreaterThan | Self::GreaterThanOrEqual | Self::LessThan | Self::LessThanOrEqual => {
                // numeric comparison
                let [value] = values else {
                    return None;
                };
                let condition_value = value.to_number()?;
                let attribute_value = match attribute? {
                    AttributeValue::Number(n) => *n,
                    AttributeValue::String(s) => s.trim().parse().ok()?,
                    _ => return None,
                };

                Some(match self {
                    Self::GreaterThan => attribute_value > condition_value,
                    Self::GreaterThanOrEqual => attribute_value >= condition_value,
                    Self::LessThan => attribute_value < condition_value,
                    _ => attribute_value <= condition_value,
                })
            }

            Self::SemVerGreaterThan | Self::SemVerLessThan | Self::SemVerEquals => {
                let [RuleValue::String(condition)] = values else {
                    return None;
                };
                let condition_version = Version::parse(condition).ok()?;
                let attribute_version = Version::parse(attribute?.as_str()?).ok()?;

                Some(match self {
                    Self::SemVerGreaterThan => attribute_version > condition_version,
                    Self::SemVerLessThan => attribute_version < condition_version,
                    _ => attribute_version == condition_version,
                })
            }

            Self::IsNull => {
                let is_null = attribute.is_none() || attribute == Some(&AttributeValue::Null);
                let [RuleValue::Boolean(expected_null)] = values else {
                    return None;
                };
                Some(is_null == *expected_null)
            }
        }
    }
}
