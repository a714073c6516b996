//! Configuration parsing.
//!
//! Uses a key=value format with `#` comments and optional quotes.
//! Precedence: CLI flags > `--config` file > `$SPOUT_CONFIG` > user config
//! (`<config dir>/spout/config`) > defaults. Empty credentials fall back to the
//! conventional provider environment variables.

use crate::tokenizer::TokenizerProfile;
use crate::types::DEFAULT_SKILL;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable naming an extra config file.
pub const CONFIG_ENV: &str = "SPOUT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// A credential value. Never printed and never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Provider credentials.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<Secret>,
    pub openai_org_id: Option<String>,
    pub anthropic_api_key: Option<Secret>,
    pub google_api_key: Option<Secret>,
    pub deepseek_api_key: Option<Secret>,
    pub replicate_api_key: Option<Secret>,
}

/// Settings shared by the engine, the backends and the CLI.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Models
    pub preferred_model: String,
    /// Model whose tokenizer is used for local token counts.
    pub token_count_model: String,

    // Skills
    pub skills_home: PathBuf,
    /// Skill roots, relative to `skills_home` unless absolute, in search order.
    pub skills_dirs: Vec<PathBuf>,
    /// Preferred skill per category (`skill.<category>` keys).
    pub preferred_skills: BTreeMap<String, String>,

    // Telemetry
    pub metrics_enabled: bool,
    pub metrics_dir: PathBuf,
    pub metrics_file: String,

    // Backend call policy
    /// Per-attempt timeout; 0 means unbounded.
    pub backend_timeout_sec: u32,
    pub backend_retries: u32,
    pub backend_retry_backoff_sec: u32,

    // Endpoints
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub gemini_base_url: String,
    pub deepseek_base_url: String,
    pub replicate_base_url: String,

    #[serde(skip)]
    pub credentials: Credentials,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map_or_else(|| PathBuf::from(".spout"), |d| d.join("spout"));
        Self {
            preferred_model: "gpt-3.5-turbo".to_string(),
            token_count_model: "gpt-3.5-turbo".to_string(),
            skills_home: data_dir.join("skills"),
            skills_dirs: vec![PathBuf::from("core"), PathBuf::from("addons")],
            preferred_skills: BTreeMap::new(),
            metrics_enabled: true,
            metrics_dir: data_dir,
            metrics_file: "api_metrics.tsv".to_string(),
            backend_timeout_sec: 0,
            backend_retries: 0,
            backend_retry_backoff_sec: 5,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            deepseek_base_url: "https://api.deepseek.com".to_string(),
            replicate_base_url: "https://api.replicate.com/v1".to_string(),
            credentials: Credentials::default(),
        }
    }
}

impl Config {
    /// Load the layered configuration: user config, `$SPOUT_CONFIG`, then
    /// `explicit`, followed by environment credential fallbacks.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(user) = Self::user_config_path() {
            if user.is_file() {
                config.load_file(&user)?;
            }
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            config.load_file(Path::new(&path))?;
        }
        if let Some(path) = explicit {
            config.load_file(path)?;
        }

        config.apply_env();
        Ok(config)
    }

    /// Location of the per-user config file.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("spout").join("config"))
    }

    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config file");
        self.parse_content(&content, &path.display().to_string())
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str, source: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());
            self.apply_value(key, &value, source)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str, source: &str) -> Result<(), ConfigError> {
        match key {
            "preferred_model" => self.preferred_model = value.to_string(),
            "token_count_model" => self.token_count_model = value.to_string(),
            "skills_home" => self.skills_home = PathBuf::from(value),
            "skills_dirs" => {
                self.skills_dirs = value.split_whitespace().map(PathBuf::from).collect();
            }
            "metrics_enabled" => self.metrics_enabled = Self::parse_bool(key, value)?,
            "metrics_dir" => self.metrics_dir = PathBuf::from(value),
            "metrics_file" => self.metrics_file = value.to_string(),
            "backend_timeout_sec" => self.backend_timeout_sec = Self::parse_int(key, value)?,
            "backend_retries" => self.backend_retries = Self::parse_int(key, value)?,
            "backend_retry_backoff_sec" => {
                self.backend_retry_backoff_sec = Self::parse_int(key, value)?;
            }
            "openai_api_key" => self.credentials.openai_api_key = Self::secret(value),
            "openai_org_id" => {
                self.credentials.openai_org_id = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            "anthropic_api_key" => self.credentials.anthropic_api_key = Self::secret(value),
            "google_api_key" => self.credentials.google_api_key = Self::secret(value),
            "deepseek_api_key" => self.credentials.deepseek_api_key = Self::secret(value),
            "replicate_api_key" => self.credentials.replicate_api_key = Self::secret(value),
            "openai_base_url" => self.openai_base_url = value.to_string(),
            "anthropic_base_url" => self.anthropic_base_url = value.to_string(),
            "gemini_base_url" => self.gemini_base_url = value.to_string(),
            "deepseek_base_url" => self.deepseek_base_url = value.to_string(),
            "replicate_base_url" => self.replicate_base_url = value.to_string(),
            _ => {
                if let Some(category) = key.strip_prefix("skill.") {
                    let category = category.trim().to_lowercase();
                    if category.is_empty() {
                        return Err(ConfigError::InvalidLine(format!("{key}={value}")));
                    }
                    self.preferred_skills
                        .insert(category, value.trim().to_lowercase());
                } else {
                    warn!(key, source, "unknown config key");
                }
            }
        }
        Ok(())
    }

    /// Parse a boolean value.
    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    fn parse_int<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn secret(value: &str) -> Option<Secret> {
        (!value.is_empty()).then(|| Secret::new(value))
    }

    /// Fill missing credentials from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Fill missing credentials using `lookup` for environment values.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let env = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.is_empty()))
        };

        let creds = &mut self.credentials;
        if creds.openai_api_key.is_none() {
            creds.openai_api_key = env(&["OPENAI_API_KEY"]).map(Secret);
        }
        if creds.openai_org_id.is_none() {
            creds.openai_org_id = env(&["OPENAI_ORG_ID"]);
        }
        if creds.anthropic_api_key.is_none() {
            creds.anthropic_api_key = env(&["ANTHROPIC_API_KEY"]).map(Secret);
        }
        if creds.google_api_key.is_none() {
            creds.google_api_key = env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]).map(Secret);
        }
        if creds.deepseek_api_key.is_none() {
            creds.deepseek_api_key = env(&["DEEPSEEK_API_KEY"]).map(Secret);
        }
        if creds.replicate_api_key.is_none() {
            creds.replicate_api_key = env(&["REPLICATE_API_TOKEN"]).map(Secret);
        }
    }

    /// Resolve relative paths against a base directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.skills_home.is_relative() {
            self.skills_home = base.join(&self.skills_home);
        }
        if self.metrics_dir.is_relative() {
            self.metrics_dir = base.join(&self.metrics_dir);
        }
    }

    /// Skill roots in search order.
    pub fn skill_roots(&self) -> Vec<PathBuf> {
        self.skills_dirs
            .iter()
            .map(|dir| {
                if dir.is_relative() {
                    self.skills_home.join(dir)
                } else {
                    dir.clone()
                }
            })
            .collect()
    }

    /// Path of the telemetry store.
    pub fn metrics_path(&self) -> PathBuf {
        self.metrics_dir.join(&self.metrics_file)
    }

    /// Skill used for `category` when none is named explicitly.
    pub fn preferred_skill(&self, category: &str) -> &str {
        self.preferred_skills
            .get(&category.to_lowercase())
            .map_or(DEFAULT_SKILL, String::as_str)
    }

    /// Tokenizer profile for local token counts.
    pub fn tokenizer(&self) -> TokenizerProfile {
        TokenizerProfile::for_model(&self.token_count_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.preferred_model, "gpt-3.5-turbo");
        assert_eq!(config.token_count_model, "gpt-3.5-turbo");
        assert_eq!(
            config.skills_dirs,
            vec![PathBuf::from("core"), PathBuf::from("addons")]
        );
        assert!(config.metrics_enabled);
        assert_eq!(config.metrics_file, "api_metrics.tsv");
        assert_eq!(config.backend_timeout_sec, 0);
        assert_eq!(config.backend_retries, 0);
        assert_eq!(config.backend_retry_backoff_sec, 5);
        assert_eq!(config.deepseek_base_url, "https://api.deepseek.com");
        assert!(config.credentials.openai_api_key.is_none());
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
# models
preferred_model="claude-3-5-sonnet-latest"
token_count_model='gpt-4o'
metrics_enabled=false
backend_timeout_sec=30
backend_retries=2
skills_dirs=core addons /opt/spout/extra
"#;
        config.parse_content(content, "test").unwrap();
        assert_eq!(config.preferred_model, "claude-3-5-sonnet-latest");
        assert_eq!(config.tokenizer(), TokenizerProfile::O200k);
        assert!(!config.metrics_enabled);
        assert_eq!(config.backend_timeout_sec, 30);
        assert_eq!(config.backend_retries, 2);
        assert_eq!(config.skills_dirs.len(), 3);
    }

    #[test]
    fn parse_preferred_skills() {
        let mut config = Config::default();
        config
            .parse_content("skill.Translate=Formal\nskill.reduce=default", "test")
            .unwrap();
        assert_eq!(config.preferred_skill("translate"), "formal");
        assert_eq!(config.preferred_skill("TRANSLATE"), "formal");
        assert_eq!(config.preferred_skill("reduce"), "default");
        assert_eq!(config.preferred_skill("unknown"), "default");
    }

    #[test]
    fn rejects_malformed_values() {
        let mut config = Config::default();
        assert!(matches!(
            config.parse_content("metrics_enabled=maybe", "test"),
            Err(ConfigError::InvalidBool { .. })
        ));
        assert!(matches!(
            config.parse_content("backend_retries=-1", "test"),
            Err(ConfigError::InvalidInt { .. })
        ));
        assert!(matches!(
            config.parse_content("just a line", "test"),
            Err(ConfigError::InvalidLine(_))
        ));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut config = Config::default();
        config.parse_content("no_such_key=1", "test").unwrap();
        assert_eq!(config.preferred_model, "gpt-3.5-turbo");
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
        assert_eq!(Config::unquote("\""), "\"");
    }

    #[test]
    fn parse_bool_accepts_variants() {
        assert!(Config::parse_bool("test", "true").unwrap());
        assert!(Config::parse_bool("test", "YES").unwrap());
        assert!(Config::parse_bool("test", "on").unwrap());
        assert!(!Config::parse_bool("test", "0").unwrap());
        assert!(!Config::parse_bool("test", "off").unwrap());
    }

    #[test]
    fn credentials_are_redacted_and_not_serialized() {
        let mut config = Config::default();
        config
            .parse_content("openai_api_key=sk-very-secret", "test")
            .unwrap();
        assert_eq!(
            config.credentials.openai_api_key.as_ref().map(Secret::expose),
            Some("sk-very-secret")
        );
        assert!(!format!("{config:?}").contains("sk-very-secret"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-very-secret"));
    }

    #[test]
    fn env_fills_only_missing_credentials() {
        let mut config = Config::default();
        config.parse_content("openai_api_key=from-file", "test").unwrap();
        config.apply_env_from(|name| match name {
            "OPENAI_API_KEY" => Some("from-env".to_string()),
            "GOOGLE_API_KEY" => Some("google".to_string()),
            "ANTHROPIC_API_KEY" => Some(String::new()),
            _ => None,
        });

        let creds = &config.credentials;
        assert_eq!(creds.openai_api_key.as_ref().map(Secret::expose), Some("from-file"));
        assert_eq!(creds.google_api_key.as_ref().map(Secret::expose), Some("google"));
        assert!(creds.anthropic_api_key.is_none());
        assert!(creds.replicate_api_key.is_none());
    }

    #[test]
    fn skill_roots_resolve_against_home() {
        let mut config = Config::default();
        config
            .parse_content("skills_home=/srv/skills\nskills_dirs=core /abs/extra", "test")
            .unwrap();
        assert_eq!(
            config.skill_roots(),
            vec![PathBuf::from("/srv/skills/core"), PathBuf::from("/abs/extra")]
        );
    }

    #[test]
    fn resolve_paths_anchors_relative_dirs() {
        let mut config = Config::default();
        config
            .parse_content("skills_home=skills\nmetrics_dir=/var/spout", "test")
            .unwrap();
        config.resolve_paths(Path::new("/work"));
        assert_eq!(config.skills_home, PathBuf::from("/work/skills"));
        assert_eq!(config.metrics_path(), PathBuf::from("/var/spout/api_metrics.tsv"));
    }

    #[test]
    fn from_file_layers_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "preferred_model=gemini-1.5-pro\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.preferred_model, "gemini-1.5-pro");
        assert_eq!(config.metrics_file, "api_metrics.tsv");

        let missing = Config::from_file(&dir.path().join("absent"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));
    }
}
