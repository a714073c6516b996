//! Per-category skill test suites.
//!
//! Test cases live in `<root>/<category>/tests/test_cases.json`:
//!
//! ```json
//! {"test_cases": [
//!   {"name": "basic", "skill": "default",
//!    "parameters": {"input": "Hello", "specification": "to Spanish"},
//!    "expected_pattern": "(?i)hola"}
//! ]}
//! ```
//!
//! Each case runs through the engine and passes when its output matches the
//! expected pattern. Another case file can be chosen with
//! [`SuiteRunner::cases_file`]: a bare file name is looked up in the
//! category's `tests/` directory, anything else is used as given.
//!
//! With [`SuiteRunner::samples`] enabled, passing cases marked `sample`
//! (the default) are appended to `samples/<category>_<skill>.txt` next to
//! the case file, after stale sample files of the category are removed.

use crate::engine::ExecutionEngine;
use chrono::{DateTime, Local};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use spout_core::{ExecutionRequest, SkillRef, Variables, DEFAULT_SKILL};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

const TEST_CASES_FILE: &str = "test_cases.json";
const SAMPLES_DIR: &str = "samples";

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("no test cases for category {0}")]
    NotFound(String),
    #[error("test case file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid test cases in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write sample {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default = "default_skill", alias = "spoutlet")]
    pub skill: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    pub expected_pattern: String,
    /// Whether a passing run is kept as a sample output.
    #[serde(default = "default_sample")]
    pub sample: bool,
}

fn default_skill() -> String {
    DEFAULT_SKILL.to_string()
}

fn default_sample() -> bool {
    true
}

impl TestCase {
    /// Parameters as template variables; non-string values in JSON form.
    pub fn variables(&self) -> Variables {
        self.parameters
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct TestCaseFile {
    test_cases: Vec<TestCase>,
}

/// Result of one test case.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub case: TestCase,
    pub qualified_name: Option<String>,
    pub passed: bool,
    /// Generated output, or the error description.
    pub detail: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub category: String,
    pub model: String,
    pub started_at: DateTime<Local>,
    pub outcomes: Vec<TestOutcome>,
    /// Sample files written during the run.
    pub samples: Vec<PathBuf>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    /// Markdown summary of the run.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {} test results\n\n", self.category));
        out.push_str(&format!(
            "Run: {}\nModel: {}\n\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.model
        ));

        for outcome in &self.outcomes {
            let status = if outcome.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!("## {} ({status})\n\n", outcome.case.name));
            out.push_str(&format!(
                "Skill: {}\n",
                outcome.qualified_name.as_deref().unwrap_or(&outcome.case.skill)
            ));
            out.push_str(&format!("Duration: {:.3}s\n", outcome.duration.as_secs_f64()));
            out.push_str("Parameters:\n");
            for (name, value) in outcome.case.variables() {
                out.push_str(&format!("  {name}: {value}\n"));
            }
            out.push_str(&format!("Expected pattern: `{}`\n\n", outcome.case.expected_pattern));
            out.push_str(&format!("```\n{}\n```\n\n", outcome.detail.trim_end()));
        }

        out.push_str(&format!(
            "Summary: {} passed, {} failed, {} total\n",
            self.passed(),
            self.failed(),
            self.outcomes.len()
        ));
        out
    }
}

/// Runs test cases through an engine.
#[derive(Debug)]
pub struct SuiteRunner<'a> {
    engine: &'a ExecutionEngine,
    cases: Option<PathBuf>,
    samples: bool,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(engine: &'a ExecutionEngine) -> Self {
        Self {
            engine,
            cases: None,
            samples: false,
        }
    }

    /// Use another case file instead of `tests/test_cases.json`.
    pub fn cases_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cases = Some(path.into());
        self
    }

    /// Write sample outputs for passing cases.
    pub fn samples(mut self, enabled: bool) -> Self {
        self.samples = enabled;
        self
    }

    /// Case file for `category`.
    pub fn cases_path(&self, category: &str) -> Result<PathBuf, SuiteError> {
        let category = category.trim().to_lowercase();
        match &self.cases {
            Some(path) if path.is_absolute() || path.components().count() > 1 => path
                .is_file()
                .then(|| path.clone())
                .ok_or_else(|| SuiteError::MissingFile(path.clone())),
            Some(name) => self
                .find_in_tests(&category, name)
                .ok_or_else(|| SuiteError::MissingFile(Path::new("tests").join(name))),
            None => self
                .find_in_tests(&category, Path::new(TEST_CASES_FILE))
                .ok_or(SuiteError::NotFound(category)),
        }
    }

    /// First root whose `<category>/tests/<name>` exists.
    fn find_in_tests(&self, category: &str, name: &Path) -> Option<PathBuf> {
        self.engine
            .resolver()
            .roots()
            .iter()
            .map(|root| root.join(category).join("tests").join(name))
            .find(|path| path.is_file())
    }

    pub fn load_cases(path: &Path) -> Result<Vec<TestCase>, SuiteError> {
        let content = std::fs::read_to_string(path).map_err(|source| SuiteError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: TestCaseFile =
            serde_json::from_str(&content).map_err(|source| SuiteError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(file.test_cases)
    }

    /// Run the category's cases, optionally only those for `skill`.
    pub async fn run(
        &self,
        category: &str,
        skill: Option<&str>,
        model: &str,
    ) -> Result<SuiteReport, SuiteError> {
        let path = self.cases_path(category)?;
        let cases = Self::load_cases(&path)?;
        let skill = skill.map(str::to_lowercase);

        let mut report = SuiteReport {
            category: category.trim().to_lowercase(),
            model: model.to_string(),
            started_at: Local::now(),
            outcomes: Vec::new(),
            samples: Vec::new(),
        };

        let samples_dir = path
            .parent()
            .map_or_else(|| PathBuf::from(SAMPLES_DIR), |dir| dir.join(SAMPLES_DIR));
        if self.samples {
            clear_samples(&samples_dir, &report.category)?;
        }

        for case in cases {
            if skill.as_ref().is_some_and(|s| *s != case.skill.to_lowercase()) {
                continue;
            }
            let outcome = self.run_case(&report.category, case, model).await;
            info!(
                case = %outcome.case.name,
                passed = outcome.passed,
                "test case finished"
            );
            if self.samples && outcome.passed && outcome.case.sample {
                let written = write_sample(&samples_dir, &report.category, model, &outcome)?;
                if !report.samples.contains(&written) {
                    report.samples.push(written);
                }
            }
            report.outcomes.push(outcome);
        }
        Ok(report)
    }

    async fn run_case(&self, category: &str, case: TestCase, model: &str) -> TestOutcome {
        let pattern = match Regex::new(&case.expected_pattern) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!(case = %case.name, error = %e, "invalid expected pattern");
                return TestOutcome {
                    detail: format!("invalid expected pattern: {e}"),
                    case,
                    qualified_name: None,
                    passed: false,
                    duration: Duration::ZERO,
                };
            }
        };

        let request = ExecutionRequest::new(SkillRef::new(category, &case.skill), model)
            .with_variables(case.variables());
        let started = Instant::now();
        match self.engine.execute(&request).await {
            Ok(result) => TestOutcome {
                passed: pattern.is_match(&result.output),
                qualified_name: Some(result.qualified_name),
                detail: result.output,
                duration: result.duration,
                case,
            },
            Err(e) => TestOutcome {
                case,
                qualified_name: None,
                passed: false,
                detail: format!("error: {e}"),
                duration: started.elapsed(),
            },
        }
    }
}

/// Remove `<category>_*.txt` samples left by earlier runs.
fn clear_samples(dir: &Path, category: &str) -> Result<(), SuiteError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(SuiteError::Read {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let prefix = format!("{category}_");
    for entry in entries.flatten() {
        let path = entry.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".txt"));
        if stale {
            std::fs::remove_file(&path).map_err(|source| SuiteError::Write {
                path: path.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Append the command line and output of a passing case to its sample file.
fn write_sample(
    dir: &Path,
    category: &str,
    model: &str,
    outcome: &TestOutcome,
) -> Result<PathBuf, SuiteError> {
    let skill = outcome.case.skill.to_lowercase();
    let path = dir.join(format!("{category}_{skill}.txt"));
    let write_err = |source| SuiteError::Write {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(write_err)?;

    let mut entry = String::new();
    if file.metadata().map_err(write_err)?.len() > 0 {
        entry.push_str("\n\n");
    }
    entry.push_str("Command:\n");
    entry.push_str(&sample_command(category, &skill, model, &outcome.case));
    entry.push_str("\n\nOutput:\n");
    entry.push_str(&outcome.detail);
    entry.push('\n');

    file.write_all(entry.as_bytes()).map_err(write_err)?;
    Ok(path)
}

/// The `spout run` invocation reproducing a case.
fn sample_command(category: &str, skill: &str, model: &str, case: &TestCase) -> String {
    let mut command = format!("spout run {category} {skill}");
    for (name, value) in case.variables() {
        command.push_str(&format!(" -v \"{name}={}\"", value.replace('"', "\\\"")));
    }
    command.push_str(&format!(" --model {model}"));
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        BackendError, BackendKind, BackendRegistry, Completion, CompletionRequest, ModelBackend,
    };
    use crate::resolver::PluginResolver;
    use async_trait::async_trait;
    use spout_core::skills::SkillTier;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CASES: &str = r#"{"test_cases": [
        {"name": "greeting", "parameters": {"input": "Hello"}, "expected_pattern": "Hello"},
        {"name": "not kept", "parameters": {"input": "Bye"}, "expected_pattern": "Bye", "sample": false},
        {"name": "mismatch", "parameters": {"input": "Hello"}, "expected_pattern": "^Hola$"}
    ]}"#;

    /// Echoes the prompt after a short delay, or fails after it.
    #[derive(Debug)]
    struct Delayed {
        fail: bool,
    }

    #[async_trait]
    impl ModelBackend for Delayed {
        fn kind(&self) -> BackendKind {
            BackendKind::OpenAi
        }

        fn supported_settings(&self) -> &'static [&'static str] {
            &[]
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(BackendError::Network("connection reset".to_string()));
            }
            Ok(Completion {
                text: format!("echo: {}", request.prompt),
                input_tokens: 3,
                output_tokens: 3,
            })
        }
    }

    fn skill_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let skill = dir
            .path()
            .join("translate")
            .join(SkillTier::Bundled.dir_name("translate"))
            .join("default");
        fs::create_dir_all(&skill).unwrap();
        fs::write(skill.join("config.json"), "{}").unwrap();
        fs::write(skill.join("skprompt.txt"), "Translate: {{$input}}").unwrap();
        fs::create_dir_all(dir.path().join("translate").join("tests")).unwrap();
        dir
    }

    fn engine(root: &Path, fail: bool) -> ExecutionEngine {
        let registry = BackendRegistry::builder(Arc::new(Delayed { fail })).build();
        ExecutionEngine::builder(PluginResolver::new(vec![root.to_path_buf()]), registry).build()
    }

    fn tests_dir(root: &Path) -> PathBuf {
        root.join("translate").join("tests")
    }

    #[tokio::test]
    async fn failed_case_reports_elapsed_time() {
        let dir = skill_tree();
        fs::write(tests_dir(dir.path()).join(TEST_CASES_FILE), CASES).unwrap();
        let engine = engine(dir.path(), true);

        let report = SuiteRunner::new(&engine)
            .run("translate", None, "gpt-4o")
            .await
            .unwrap();
        assert_eq!(report.failed(), 3);
        for outcome in &report.outcomes {
            assert!(outcome.detail.starts_with("error: "));
            assert!(outcome.duration >= Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn cases_file_by_name_or_path() {
        let dir = skill_tree();
        fs::write(tests_dir(dir.path()).join("smoke.json"), CASES).unwrap();
        let elsewhere = dir.path().join("elsewhere.json");
        fs::write(
            &elsewhere,
            r#"{"test_cases": [{"name": "only", "parameters": {"input": "x"}, "expected_pattern": "x"}]}"#,
        )
        .unwrap();
        let engine = engine(dir.path(), false);

        let by_name = SuiteRunner::new(&engine)
            .cases_file("smoke.json")
            .run("translate", None, "gpt-4o")
            .await
            .unwrap();
        assert_eq!(by_name.outcomes.len(), 3);
        assert_eq!(by_name.passed(), 2);

        let by_path = SuiteRunner::new(&engine)
            .cases_file(&elsewhere)
            .run("translate", None, "gpt-4o")
            .await
            .unwrap();
        assert_eq!(by_path.outcomes.len(), 1);
        assert!(by_path.all_passed());

        let missing = SuiteRunner::new(&engine)
            .cases_file("nope.json")
            .run("translate", None, "gpt-4o")
            .await
            .unwrap_err();
        assert!(matches!(missing, SuiteError::MissingFile(_)));

        // Default file absent.
        let err = SuiteRunner::new(&engine)
            .run("translate", None, "gpt-4o")
            .await
            .unwrap_err();
        assert!(matches!(err, SuiteError::NotFound(ref c) if c == "translate"));
    }

    #[tokio::test]
    async fn samples_keep_passing_cases_and_replace_stale_files() {
        let dir = skill_tree();
        let tests = tests_dir(dir.path());
        fs::write(tests.join(TEST_CASES_FILE), CASES).unwrap();
        let samples = tests.join(SAMPLES_DIR);
        fs::create_dir_all(&samples).unwrap();
        fs::write(samples.join("translate_stale.txt"), "old").unwrap();
        fs::write(samples.join("notes.txt"), "keep").unwrap();
        let engine = engine(dir.path(), false);

        let report = SuiteRunner::new(&engine)
            .samples(true)
            .run("translate", None, "gpt-4o")
            .await
            .unwrap();

        let sample_path = samples.join("translate_default.txt");
        assert_eq!(report.samples, vec![sample_path.clone()]);
        assert!(!samples.join("translate_stale.txt").exists());
        assert!(samples.join("notes.txt").exists());

        let content = fs::read_to_string(&sample_path).unwrap();
        assert_eq!(
            content,
            "Command:\nspout run translate default -v \"input=Hello\" --model gpt-4o\n\n\
             Output:\necho: Translate: Hello\n"
        );

        // A second run starts from a clean sample file.
        SuiteRunner::new(&engine)
            .samples(true)
            .run("translate", None, "gpt-4o")
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&sample_path).unwrap(), content);
    }

    #[tokio::test]
    async fn no_samples_unless_enabled() {
        let dir = skill_tree();
        fs::write(tests_dir(dir.path()).join(TEST_CASES_FILE), CASES).unwrap();
        let engine = engine(dir.path(), false);

        let report = SuiteRunner::new(&engine)
            .run("translate", None, "gpt-4o")
            .await
            .unwrap();
        assert!(report.samples.is_empty());
        assert!(!tests_dir(dir.path()).join(SAMPLES_DIR).exists());
    }

    #[test]
    fn sample_command_quotes_values() {
        let case: TestCase = serde_json::from_str(
            r#"{"name": "q", "parameters": {"input": "say \"hi\"", "n": 2}, "expected_pattern": "."}"#,
        )
        .unwrap();
        assert_eq!(
            sample_command("translate", "default", "gpt-4o", &case),
            r#"spout run translate default -v "input=say \"hi\"" -v "n=2" --model gpt-4o"#
        );
    }

    #[test]
    fn parses_cases_with_defaults() {
        let file: TestCaseFile = serde_json::from_str(
            r#"{"test_cases": [
                {"name": "basic", "parameters": {"input": "Hello", "count": 3}, "expected_pattern": "Hola"},
                {"name": "legacy", "spoutlet": "formal", "expected_pattern": "."}
            ]}"#,
        )
        .unwrap();

        assert_eq!(file.test_cases[0].skill, "default");
        let vars = file.test_cases[0].variables();
        assert_eq!(vars["input"], "Hello");
        assert_eq!(vars["count"], "3");
        assert_eq!(file.test_cases[1].skill, "formal");
        assert!(file.test_cases[1].parameters.is_empty());
        assert!(file.test_cases[0].sample);
    }

    #[test]
    fn markdown_summarizes_outcomes() {
        let case = TestCase {
            name: "basic".to_string(),
            skill: "default".to_string(),
            parameters: serde_json::Map::new(),
            expected_pattern: "Hola".to_string(),
            sample: true,
        };
        let report = SuiteReport {
            category: "translate".to_string(),
            model: "gpt-4o".to_string(),
            started_at: Local::now(),
            outcomes: vec![
                TestOutcome {
                    case: case.clone(),
                    qualified_name: Some("translate".to_string()),
                    passed: true,
                    detail: "Hola".to_string(),
                    duration: Duration::from_millis(250),
                },
                TestOutcome {
                    case,
                    qualified_name: None,
                    passed: false,
                    detail: "error: skill not found".to_string(),
                    duration: Duration::ZERO,
                },
            ],
            samples: Vec::new(),
        };

        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_passed());
        let md = report.to_markdown();
        assert!(md.starts_with("# translate test results"));
        assert!(md.contains("## basic (PASS)"));
        assert!(md.contains("## basic (FAIL)"));
        assert!(md.contains("Duration: 0.250s"));
        assert!(md.contains("Summary: 1 passed, 1 failed, 2 total"));
    }
}
