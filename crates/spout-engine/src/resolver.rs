//! Skill resolution across layered directories.
//!
//! A skill lives at `<root>/<category>/<category>_<tier>/<skill>/` and holds
//! one `*.json` configuration and one `*.txt` template. Tiers are tried in
//! precedence order (override, extended, bundled); within a tier, roots are
//! tried in configured order. The first valid candidate wins.

use spout_core::config::Config;
use spout_core::skills::{parse_skill_config, qualified_name, SkillDefinition, SkillTier};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const CONFIG_EXT: &str = "json";
const TEMPLATE_EXT: &str = "txt";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("skill not found: {category}:{skill}")]
    SkillNotFound { category: String, skill: String },
    #[error("invalid skill config {}: {reason}", path.display())]
    ConfigInvalid { path: PathBuf, reason: String },
}

/// A skill visible in a category, tagged with the tier `resolve` would pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillEntry {
    pub category: String,
    pub name: String,
    pub tier: SkillTier,
    pub path: PathBuf,
}

impl SkillEntry {
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.category, &self.name, self.tier)
    }
}

/// Configuration and template files of a valid candidate directory.
#[derive(Debug)]
struct CandidateFiles {
    config: PathBuf,
    template: PathBuf,
}

/// Locates skills by precedence. Holds no cache: every call reads the tree.
#[derive(Debug, Clone)]
pub struct PluginResolver {
    roots: Vec<PathBuf>,
}

impl PluginResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.skill_roots())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Tier directories for `category`, in search order.
    pub fn category_dirs(&self, category: &str) -> Vec<(SkillTier, PathBuf)> {
        let category = category.trim().to_lowercase();
        SkillTier::PRECEDENCE
            .iter()
            .flat_map(|tier| {
                let dir_name = tier.dir_name(&category);
                let category = category.clone();
                self.roots
                    .iter()
                    .map(move |root| (*tier, root.join(&category).join(&dir_name)))
            })
            .collect()
    }

    /// Resolve `category`/`skill` to its definition.
    pub fn resolve(&self, category: &str, skill: &str) -> Result<SkillDefinition, ResolveError> {
        let category = category.trim().to_lowercase();
        let skill = skill.trim().to_lowercase();

        for (tier, tier_dir) in self.category_dirs(&category) {
            let skill_dir = tier_dir.join(&skill);
            let Some(files) = candidate_files(&skill_dir) else {
                continue;
            };

            debug!(
                category = %category,
                skill = %skill,
                tier = %tier,
                path = %skill_dir.display(),
                "resolved skill"
            );
            return load_definition(&category, &skill, tier, skill_dir, &files);
        }

        Err(ResolveError::SkillNotFound { category, skill })
    }

    /// Categories with at least one tier directory under any root.
    pub fn list_categories(&self) -> Vec<String> {
        let mut categories = BTreeSet::new();
        for root in &self.roots {
            let Ok(entries) = fs::read_dir(root) else {
                debug!(path = %root.display(), "skills root not readable, skipping");
                continue;
            };
            for entry in entries.filter_map(Result::ok) {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let dir = entry.path();
                let has_tier = SkillTier::PRECEDENCE
                    .iter()
                    .any(|tier| dir.join(tier.dir_name(&name)).is_dir());
                if has_tier {
                    categories.insert(name);
                }
            }
        }
        categories.into_iter().collect()
    }

    /// Skills of `category`, one per name, sorted by name.
    pub fn list_skills(&self, category: &str) -> Vec<SkillEntry> {
        let category = category.trim().to_lowercase();
        let mut found: BTreeMap<String, SkillEntry> = BTreeMap::new();

        for (tier, tier_dir) in self.category_dirs(&category) {
            let Ok(entries) = fs::read_dir(&tier_dir) else {
                continue;
            };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if name != name.to_lowercase() {
                    debug!(path = %path.display(), "skill directory name is not lower case, skipping");
                    continue;
                }
                if found.contains_key(&name) || candidate_files(&path).is_none() {
                    continue;
                }
                found.insert(
                    name.clone(),
                    SkillEntry {
                        category: category.clone(),
                        name,
                        tier,
                        path,
                    },
                );
            }
        }

        found.into_values().collect()
    }
}

/// Config and template of `dir`, or `None` when it is not a valid candidate.
fn candidate_files(dir: &Path) -> Option<CandidateFiles> {
    if !dir.is_dir() {
        return None;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to read skill directory");
            return None;
        }
    };

    let mut configs = Vec::new();
    let mut templates = Vec::new();
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(CONFIG_EXT) => configs.push(path),
            Some(TEMPLATE_EXT) => templates.push(path),
            _ => {}
        }
    }

    let Some(config) = first_sorted(dir, "config", configs) else {
        debug!(path = %dir.display(), "no config file, skipping");
        return None;
    };
    let Some(template) = first_sorted(dir, "template", templates) else {
        debug!(path = %dir.display(), "no template file, skipping");
        return None;
    };
    Some(CandidateFiles { config, template })
}

/// First path in sort order, warning when there is more than one.
fn first_sorted(dir: &Path, kind: &str, mut paths: Vec<PathBuf>) -> Option<PathBuf> {
    paths.sort();
    if paths.len() > 1 {
        warn!(
            path = %dir.display(),
            kind,
            count = paths.len(),
            using = %paths[0].display(),
            "multiple skill files, using the first"
        );
    }
    paths.into_iter().next()
}

fn load_definition(
    category: &str,
    skill: &str,
    tier: SkillTier,
    dir: PathBuf,
    files: &CandidateFiles,
) -> Result<SkillDefinition, ResolveError> {
    let invalid = |path: &Path, reason: String| ResolveError::ConfigInvalid {
        path: path.to_path_buf(),
        reason,
    };

    let content =
        fs::read_to_string(&files.config).map_err(|e| invalid(&files.config, e.to_string()))?;
    let config = parse_skill_config(&content).map_err(|e| invalid(&files.config, e.to_string()))?;
    let template =
        fs::read_to_string(&files.template).map_err(|e| invalid(&files.template, e.to_string()))?;

    Ok(SkillDefinition {
        category: category.to_string(),
        name: skill.to_string(),
        tier,
        path: dir,
        description: config.description,
        input_variables: config.input_variables,
        execution_settings: config.execution_settings,
        template,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "schema": 1,
        "description": "Translate text",
        "input_variables": [
            {"name": "input", "defaultValue": ""},
            {"name": "specification", "defaultValue": "to English"}
        ],
        "execution_settings": {"default": {"max_tokens": 500, "temperature": 0.2}}
    }"#;

    fn make_skill(root: &Path, category: &str, tier: SkillTier, skill: &str, template: &str) -> PathBuf {
        let dir = root.join(category).join(tier.dir_name(category)).join(skill);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), CONFIG).unwrap();
        fs::write(dir.join("skprompt.txt"), template).unwrap();
        dir
    }

    #[test]
    fn resolves_bundled_skill() {
        let tmp = TempDir::new().unwrap();
        let dir = make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "Translate {{$input}}");
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);

        let def = resolver.resolve("Translate", "DEFAULT").unwrap();
        assert_eq!(def.category, "translate");
        assert_eq!(def.name, "default");
        assert_eq!(def.tier, SkillTier::Bundled);
        assert_eq!(def.path, dir);
        assert_eq!(def.template, "Translate {{$input}}");
        assert_eq!(def.description.as_deref(), Some("Translate text"));
        assert_eq!(def.input_variables.len(), 2);
        assert_eq!(def.execution_settings.get_u64("max_tokens"), Some(500));
    }

    #[test]
    fn resolution_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "x");
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);
        assert_eq!(
            resolver.resolve("translate", "default").unwrap(),
            resolver.resolve("translate", "default").unwrap()
        );
    }

    #[test]
    fn override_beats_bundled() {
        let tmp = TempDir::new().unwrap();
        make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "bundled");
        make_skill(tmp.path(), "translate", SkillTier::Extended, "default", "extended");
        make_skill(tmp.path(), "translate", SkillTier::Override, "default", "override");
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);

        let def = resolver.resolve("translate", "default").unwrap();
        assert_eq!(def.tier, SkillTier::Override);
        assert_eq!(def.template, "override");
    }

    #[test]
    fn tiers_take_precedence_over_root_order() {
        let core = TempDir::new().unwrap();
        let addons = TempDir::new().unwrap();
        make_skill(core.path(), "translate", SkillTier::Bundled, "default", "core bundled");
        make_skill(addons.path(), "translate", SkillTier::Extended, "default", "addon extended");
        let resolver =
            PluginResolver::new(vec![core.path().to_path_buf(), addons.path().to_path_buf()]);

        let def = resolver.resolve("translate", "default").unwrap();
        assert_eq!(def.tier, SkillTier::Extended);
        assert_eq!(def.template, "addon extended");
    }

    #[test]
    fn incomplete_candidate_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let broken = tmp
            .path()
            .join("translate")
            .join(SkillTier::Override.dir_name("translate"))
            .join("default");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("config.json"), CONFIG).unwrap();
        make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "bundled");
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);

        assert_eq!(
            resolver.resolve("translate", "default").unwrap().tier,
            SkillTier::Bundled
        );
    }

    #[test]
    fn multiple_files_use_first_in_sort_order() {
        let tmp = TempDir::new().unwrap();
        let dir = make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "second");
        fs::write(dir.join("a_prompt.txt"), "first").unwrap();
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);

        assert_eq!(resolver.resolve("translate", "default").unwrap().template, "first");
    }

    #[test]
    fn missing_skill_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);
        let err = resolver.resolve("translate", "formal").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::SkillNotFound { ref category, ref skill }
                if category == "translate" && skill == "formal"
        ));
    }

    #[test]
    fn invalid_config_is_reported() {
        let tmp = TempDir::new().unwrap();
        let dir = make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "x");
        fs::write(dir.join("config.json"), r#"{"input_variables": [{"name": ""}]}"#).unwrap();
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);

        let err = resolver.resolve("translate", "default").unwrap_err();
        match err {
            ResolveError::ConfigInvalid { path, .. } => assert_eq!(path, dir.join("config.json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sees_directory_changes_between_calls() {
        let tmp = TempDir::new().unwrap();
        make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "bundled");
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);
        assert_eq!(resolver.resolve("translate", "default").unwrap().tier, SkillTier::Bundled);

        make_skill(tmp.path(), "translate", SkillTier::Override, "default", "override");
        assert_eq!(resolver.resolve("translate", "default").unwrap().tier, SkillTier::Override);
    }

    #[test]
    fn lists_categories_and_skills() {
        let tmp = TempDir::new().unwrap();
        make_skill(tmp.path(), "translate", SkillTier::Bundled, "default", "x");
        make_skill(tmp.path(), "translate", SkillTier::Bundled, "formal", "x");
        make_skill(tmp.path(), "translate", SkillTier::Override, "formal", "x");
        make_skill(tmp.path(), "reduce", SkillTier::Extended, "default", "x");
        fs::create_dir_all(tmp.path().join("notes")).unwrap();
        let resolver = PluginResolver::new(vec![tmp.path().to_path_buf()]);

        assert_eq!(resolver.list_categories(), vec!["reduce", "translate"]);

        let skills = resolver.list_skills("translate");
        let summary: Vec<_> = skills.iter().map(|s| (s.name.as_str(), s.tier)).collect();
        assert_eq!(
            summary,
            vec![("default", SkillTier::Bundled), ("formal", SkillTier::Override)]
        );
        assert_eq!(skills[1].qualified_name(), "translate:formal*");
    }
}
