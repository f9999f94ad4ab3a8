//! Flag identities and the cache keys derived from them.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Namespace a flag belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlagScope {
    /// A single value shared by all consumers.
    #[default]
    Global,
    /// Versioned per deploying application, so each application version rolls out independently.
    #[serde(rename_all = "camelCase")]
    Application {
        application_name: String,
        application_version: String,
    },
}

impl FlagScope {
    /// Create an application scope. Both name and version must be non-blank.
    pub fn application(name: impl Into<String>, version: impl Into<String>) -> Result<FlagScope> {
        let application_name = name.into();
        let application_version = version.into();
        if application_name.trim().is_empty() {
            return Err(Error::InvalidContext("application name is empty".into()));
        }
        if application_version.trim().is_empty() {
            return Err(Error::InvalidContext("application version is empty".into()));
        }
        Ok(FlagScope::Application {
            application_name,
            application_version,
        })
    }

    /// Discriminator used as the scope part of a [`CacheKey`].
    fn discriminator(&self) -> String {
        match self {
            FlagScope::Global => "global".to_owned(),
            FlagScope::Application {
                application_name,
                application_version,
            } => format!(
                "{}+{}",
                escape(application_name),
                escape(application_version)
            ),
        }
    }
}

/// Escape the characters used as separators in a [`CacheKey`].
fn escape(component: &str) -> String {
    component
        .replace('%', "%25")
        .replace('+', "%2B")
        .replace(':', "%3A")
}

/// Uniquely identifies a stored flag configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagIdentity {
    key: String,
    #[serde(default)]
    scope: FlagScope,
}

impl FlagIdentity {
    /// Identity of a flag in `scope`. Fails with [`Error::InvalidContext`] on a blank key.
    pub fn new(key: impl Into<String>, scope: FlagScope) -> Result<FlagIdentity> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::InvalidContext("flag key is empty".into()));
        }
        Ok(FlagIdentity { key, scope })
    }

    /// Identity of a global flag.
    pub fn global(key: impl Into<String>) -> Result<FlagIdentity> {
        FlagIdentity::new(key, FlagScope::Global)
    }

    /// Identity of an application-scoped flag.
    pub fn application(
        key: impl Into<String>,
        application_name: impl Into<String>,
        application_version: impl Into<String>,
    ) -> Result<FlagIdentity> {
        let scope = FlagScope::application(application_name, application_version)?;
        FlagIdentity::new(key, scope)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn scope(&self) -> &FlagScope {
        &self.scope
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from(self)
    }
}

impl fmt::Display for FlagIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope.discriminator(), self.key)
    }
}

/// Cache key of a flag configuration: scope discriminator plus flag key.
///
/// Flags sharing a key but differing in scope, application or version never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&FlagIdentity> for CacheKey {
    fn from(identity: &FlagIdentity) -> CacheKey {
        // Scope components are escaped, so the first ':' always separates scope from key.
        CacheKey(format!("{}:{}", identity.scope.discriminator(), identity.key))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_cache_key() {
        let identity = FlagIdentity::global("new-checkout").unwrap();
        assert_eq!(identity.cache_key().as_str(), "global:new-checkout");
    }

    #[test]
    fn scoped_keys_do_not_collide() {
        let global = FlagIdentity::global("search").unwrap().cache_key();
        let v1 = FlagIdentity::application("search", "shop", "1.0.0")
            .unwrap()
            .cache_key();
        let v2 = FlagIdentity::application("search", "shop", "2.0.0")
            .unwrap()
            .cache_key();
        let other_app = FlagIdentity::application("search", "admin", "1.0.0")
            .unwrap()
            .cache_key();

        assert_ne!(global, v1);
        assert_ne!(v1, v2);
        assert_ne!(v1, other_app);
        assert_eq!(v1.as_str(), "shop+1.0.0:search");
    }

    #[test]
    fn separators_in_application_names_are_escaped() {
        let a = FlagIdentity::application("flag", "a+b", "c").unwrap().cache_key();
        let b = FlagIdentity::application("flag", "a", "b+c").unwrap().cache_key();
        let c = FlagIdentity::application("x:flag", "a", "b").unwrap().cache_key();
        let d = FlagIdentity::application("flag", "a", "b:x").unwrap().cache_key();
        assert_ne!(a, b);
        assert_ne!(c, d);
    }

    #[test]
    fn rejects_blank_inputs() {
        assert_eq!(
            FlagIdentity::global("  "),
            Err(Error::InvalidContext("flag key is empty".into()))
        );
        assert!(FlagIdentity::application("flag", "", "1.0").is_err());
        assert!(FlagIdentity::application("flag", "shop", " ").is_err());
    }

    #[test]
    fn identity_defaults_to_global_scope_when_deserialized() {
        let identity: FlagIdentity = serde_json::from_str(r#"{"key": "dark-mode"}"#).unwrap();
        assert_eq!(identity.scope(), &FlagScope::Global);
    }
}
