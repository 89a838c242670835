//! Target and execution environments.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ConfigurationError;

/// A named logical deployment context.
///
/// Checks declare the environments they observe; the engine runs inside
/// exactly one of them. Two environments are equal iff their names are
/// equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    name: String,
    hostname: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Default piggyback hostname for results produced against this
    /// environment.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Environment {}

impl Hash for Environment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Registry of all known environments, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRegistry {
    by_name: BTreeMap<String, Environment>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an environment. Names are unique within one registry.
    pub fn insert(&mut self, env: Environment) -> Result<(), ConfigurationError> {
        if self.by_name.contains_key(env.name()) {
            return Err(ConfigurationError::DuplicateEnvironment {
                name: env.name().to_string(),
            });
        }
        self.by_name.insert(env.name().to_string(), env);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Environment> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl<'a> IntoIterator for &'a EnvironmentRegistry {
    type Item = &'a Environment;
    type IntoIter = btree_map::Values<'a, String, Environment>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_name.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_name() {
        let a = Environment::new("prod").with_hostname("host-a");
        let b = Environment::new("prod").with_hostname("host-b");
        assert_eq!(a, b);
        assert_ne!(a, Environment::new("staging"));
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut registry = EnvironmentRegistry::new();
        registry.insert(Environment::new("prod")).unwrap();
        let err = registry.insert(Environment::new("prod")).unwrap_err();
        assert!(err.to_string().contains("prod"));
    }

    #[test]
    fn registry_lookup_and_iteration() {
        let mut registry = EnvironmentRegistry::new();
        registry.insert(Environment::new("staging")).unwrap();
        registry.insert(Environment::new("prod")).unwrap();

        assert!(registry.contains("prod"));
        assert!(registry.get("qa").is_none());
        let names: Vec<&str> = registry.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["prod", "staging"]);
    }
}
