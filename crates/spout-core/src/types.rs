//! Core types shared by the resolver, the engine and the telemetry store.

use crate::skills::SkillTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for invocations.
/// Uses `UUIDv7` so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Variable bindings for a template.
///
/// Ordered so that serialization (and therefore the input fingerprint) is stable.
pub type Variables = BTreeMap<String, String>;

/// Reference to a skill by category and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillRef {
    pub category: String,
    pub skill: String,
}

impl SkillRef {
    /// Build a reference, normalizing both parts to lower case.
    pub fn new(category: impl AsRef<str>, skill: impl AsRef<str>) -> Self {
        Self {
            category: category.as_ref().trim().to_lowercase(),
            skill: skill.as_ref().trim().to_lowercase(),
        }
    }

    /// Reference to the `default` skill of a category.
    pub fn default_of(category: impl AsRef<str>) -> Self {
        Self::new(category, DEFAULT_SKILL)
    }
}

impl std::fmt::Display for SkillRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.skill)
    }
}

/// Name of the skill used when none is requested.
pub const DEFAULT_SKILL: &str = "default";

/// Backend parameters declared by a skill (`execution_settings.default`).
///
/// Keys are generic parameter names (`max_tokens`, `temperature`, ...);
/// each backend keeps the subset it understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionSettings(BTreeMap<String, Value>);

impl ExecutionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Numeric value of a setting. Numeric strings are accepted too.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Non-negative integer value of a setting. Numeric strings are accepted too.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the settings named in `supported` and the names of the rest.
    pub fn partition(&self, supported: &[&str]) -> (ExecutionSettings, Vec<String>) {
        let mut kept = BTreeMap::new();
        let mut dropped = Vec::new();
        for (key, value) in &self.0 {
            if supported.contains(&key.as_str()) {
                kept.insert(key.clone(), value.clone());
            } else {
                dropped.push(key.clone());
            }
        }
        (Self(kept), dropped)
    }

    /// Move a setting to a new name, keeping its value.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(value) = self.0.remove(from) {
            self.0.insert(to.to_string(), value);
        }
    }
}

impl From<serde_json::Map<String, Value>> for ExecutionSettings {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

/// One request to execute a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub skill: SkillRef,
    pub variables: Variables,
    /// Requested model identifier; selects the backend.
    pub model: String,
    /// Organization context forwarded to backends that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl ExecutionRequest {
    pub fn new(skill: SkillRef, model: impl Into<String>) -> Self {
        Self {
            skill,
            variables: Variables::new(),
            model: model.into(),
            organization: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

/// Outcome of one successful skill invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub invocation_id: Id,
    /// Generated text.
    pub output: String,
    /// Model id the backend was invoked with.
    pub model: String,
    /// Category, skill and tier marker, e.g. `translate` or `translate:formal*`.
    pub qualified_name: String,
    pub skill: SkillRef,
    pub tier: SkillTier,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_hash: String,
    pub output_hash: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.output)
    }
}
