//! Skill definitions and configuration parsing.
//!
//! A skill directory holds one JSON configuration file and one text template.
//! The configuration declares the template's input variables and the backend
//! settings used when the skill is executed:
//!
//! ```json
//! {
//!   "schema": 1,
//!   "description": "Translate text",
//!   "input_variables": [{ "name": "input", "defaultValue": "" }],
//!   "execution_settings": { "default": { "max_tokens": 1000, "temperature": 0.2 } }
//! }
//! ```

use crate::types::{ExecutionSettings, Variables, DEFAULT_SKILL};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Layer a skill was resolved from, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillTier {
    /// User overrides; always win.
    Override,
    /// Extended skill packs installed next to the bundled set.
    Extended,
    /// Skills shipped with the tool.
    Bundled,
}

impl SkillTier {
    /// Tiers in the order they are searched.
    pub const PRECEDENCE: [SkillTier; 3] = [Self::Override, Self::Extended, Self::Bundled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Extended => "extended",
            Self::Bundled => "bundled",
        }
    }

    /// Marker appended to qualified skill names in output and telemetry.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Override => "*",
            Self::Extended => "^",
            Self::Bundled => "",
        }
    }

    /// Directory holding this tier's skills for `category`: `<category>_<tier>`.
    pub fn dir_name(&self, category: &str) -> String {
        format!("{category}_{}", self.as_str())
    }
}

impl std::fmt::Display for SkillTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualified skill name used for display and as the telemetry join key.
///
/// `translate` for the default skill, `translate:formal` otherwise, followed
/// by the tier marker.
pub fn qualified_name(category: &str, skill: &str, tier: SkillTier) -> String {
    if skill == DEFAULT_SKILL {
        format!("{category}{}", tier.marker())
    } else {
        format!("{category}:{skill}{}", tier.marker())
    }
}

/// Error type for skill configuration parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkillError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid input variable name: {0:?}")]
    InvalidVariableName(String),
    #[error("duplicate input variable: {0}")]
    DuplicateVariable(String),
    #[error("execution_settings.{0} must be an object")]
    InvalidSettings(String),
}

/// A declared template input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Value used when the caller does not bind the variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Parsed and validated skill configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillConfig {
    pub description: Option<String>,
    pub input_variables: Vec<InputVariable>,
    pub execution_settings: ExecutionSettings,
}

/// Raw configuration as it appears on disk.
#[derive(Debug, Deserialize)]
struct RawSkillConfig {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_variables: Vec<RawInputVariable>,
    #[serde(default)]
    execution_settings: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawInputVariable {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "defaultValue", default)]
    default_value: Option<Value>,
}

/// Validates an input variable name.
///
/// Names must be non-empty and must not contain `}}` or a line break, since
/// such a name could never be referenced by a `{{$name}}` placeholder.
pub fn validate_variable_name(name: &str) -> Result<(), SkillError> {
    if name.is_empty() || name.contains("}}") || name.contains(['\n', '\r']) {
        return Err(SkillError::InvalidVariableName(name.to_string()));
    }
    Ok(())
}

/// String form of a JSON default value. `null` means no default.
fn default_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Parses a skill configuration file.
pub fn parse_skill_config(content: &str) -> Result<SkillConfig, SkillError> {
    let raw: RawSkillConfig =
        serde_json::from_str(content).map_err(|e| SkillError::InvalidJson(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut input_variables = Vec::with_capacity(raw.input_variables.len());
    for var in raw.input_variables {
        validate_variable_name(&var.name)?;
        if !seen.insert(var.name.clone()) {
            return Err(SkillError::DuplicateVariable(var.name));
        }
        input_variables.push(InputVariable {
            name: var.name,
            description: var.description,
            default: var.default_value.and_then(default_to_string),
        });
    }

    let mut execution_settings = ExecutionSettings::new();
    for (service, settings) in raw.execution_settings {
        let Value::Object(map) = settings else {
            return Err(SkillError::InvalidSettings(service));
        };
        // Only the `default` service block is used; others are validated and ignored.
        if service == "default" {
            execution_settings = ExecutionSettings::from(map);
        }
    }

    Ok(SkillConfig {
        description: raw.description,
        input_variables,
        execution_settings,
    })
}

/// A resolved skill. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub category: String,
    pub name: String,
    pub tier: SkillTier,
    /// Directory the skill was loaded from.
    pub path: PathBuf,
    pub description: Option<String>,
    pub input_variables: Vec<InputVariable>,
    pub execution_settings: ExecutionSettings,
    /// Raw template text.
    pub template: String,
}

impl SkillDefinition {
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.category, &self.name, self.tier)
    }

    /// Defaults declared by the schema.
    pub fn defaults(&self) -> Variables {
        self.input_variables
            .iter()
            .filter_map(|v| v.default.clone().map(|d| (v.name.clone(), d)))
            .collect()
    }

    /// Merge explicit bindings over the declared defaults.
    ///
    /// Explicit values win. A declared variable with no default and no
    /// binding stays unbound, so its placeholder is left in the output.
    pub fn bind(&self, explicit: &Variables) -> Variables {
        let mut bound = self.defaults();
        bound.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        bound
    }
}
