//! Loading `devflow.yaml` with variable substitution and profiles.
//!
//! The resolver loads every sub-project through the [`ConfigLoader`] trait so tests
//! and embedders can supply configs without touching the file system.
//!
//! `${NAME}` references are replaced before parsing. Values come from, in order:
//! 1. overrides passed in [`LoadOptions::vars`] (a dependency's `vars:`)
//! 2. the file's own top-level `vars:` defaults
//! 3. the process environment
//!
//! A reference without any value is an error.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::project::ProjectConfig;
use crate::constants::DEFAULT_CONFIG_FILE;
use crate::core::DevflowError;

static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid variable pattern"));

/// Per-load options, usually taken from a dependency descriptor.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub profile: Option<String>,
    pub vars: BTreeMap<String, String>,
    /// File name inside the project directory, defaults to `devflow.yaml`.
    pub config_name: Option<String>,
}

/// Source of parsed project configs.
pub trait ConfigLoader: Send + Sync {
    /// Load the config of the project rooted at `project_dir`.
    fn load(&self, project_dir: &Path, options: &LoadOptions) -> Result<ProjectConfig>;
}

/// Reads configs from YAML files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlConfigLoader;

impl YamlConfigLoader {
    pub fn config_path(project_dir: &Path, options: &LoadOptions) -> PathBuf {
        project_dir.join(options.config_name.as_deref().unwrap_or(DEFAULT_CONFIG_FILE))
    }

    /// Parse config text. `file` is only used in error messages.
    pub fn parse(content: &str, file: &str, options: &LoadOptions) -> Result<ProjectConfig> {
        let defaults = read_var_defaults(content, file)?;
        let substituted = substitute_vars(content, file, &options.vars, &defaults)?;

        let mut config: ProjectConfig =
            serde_yaml::from_str(&substituted).map_err(|e| DevflowError::ConfigParseError {
                file: file.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(profile) = &options.profile {
            config.apply_profile(profile, file)?;
        }
        Ok(config)
    }
}

impl ConfigLoader for YamlConfigLoader {
    fn load(&self, project_dir: &Path, options: &LoadOptions) -> Result<ProjectConfig> {
        let path = Self::config_path(project_dir, options);
        if !path.is_file() {
            return Err(DevflowError::ConfigNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content, &path.display().to_string(), options)?;

        if config.name.is_empty() {
            config.name = project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string());
        }

        tracing::debug!(
            "Loaded {} ({} images, {} dependencies)",
            path.display(),
            config.images.len(),
            config.dependencies.len()
        );
        Ok(config)
    }
}

/// Read the top-level `vars:` mapping without substituting anything.
fn read_var_defaults(content: &str, file: &str) -> Result<BTreeMap<String, String>> {
    let value: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| DevflowError::ConfigParseError {
        file: file.to_string(),
        reason: e.to_string(),
    })?;

    let mut defaults = BTreeMap::new();
    if let Some(vars) = value.get("vars").and_then(serde_yaml::Value::as_mapping) {
        for (key, value) in vars {
            let (Some(key), Some(value)) = (key.as_str(), scalar_to_string(value)) else {
                continue;
            };
            defaults.insert(key.to_string(), value);
        }
    }
    Ok(defaults)
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn substitute_vars(
    content: &str,
    file: &str,
    overrides: &BTreeMap<String, String>,
    defaults: &BTreeMap<String, String>,
) -> Result<String, DevflowError> {
    let mut missing = None;
    let replaced = VAR_PATTERN.replace_all(content, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        if let Some(value) = overrides.get(name).or_else(|| defaults.get(name)) {
            return value.clone();
        }
        if let Ok(value) = std::env::var(name) {
            return value;
        }
        missing.get_or_insert_with(|| name.to_string());
        String::new()
    });

    match missing {
        Some(name) => Err(DevflowError::UnresolvedVariable {
            name,
            file: file.to_string(),
        }),
        None => Ok(replaced.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const WITH_VARS: &str = r#"
name: api
vars:
  REGISTRY: registry.local
  VERSION: 3
images:
  api:
    image: ${REGISTRY}/api
    tags: ["v${VERSION}"]
"#;

    #[test]
    fn test_defaults_and_overrides() {
        let config = YamlConfigLoader::parse(WITH_VARS, "devflow.yaml", &LoadOptions::default()).unwrap();
        let api = config.images.get("api").unwrap();
        assert_eq!(api.image, "registry.local/api");
        assert_eq!(api.tags, vec!["v3"]);

        let options = LoadOptions {
            vars: BTreeMap::from([("REGISTRY".to_string(), "ghcr.io/acme".to_string())]),
            ..Default::default()
        };
        let config = YamlConfigLoader::parse(WITH_VARS, "devflow.yaml", &options).unwrap();
        assert_eq!(config.images.get("api").unwrap().image, "ghcr.io/acme/api");
    }

    #[test]
    #[serial]
    fn test_environment_fallback_and_missing_variable() {
        let content = "name: x\nimages:\n  a:\n    image: ${DEVFLOW_TEST_REGISTRY}/a\n";

        let err = YamlConfigLoader::parse(content, "devflow.yaml", &LoadOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DevflowError>(),
            Some(DevflowError::UnresolvedVariable { name, .. }) if name == "DEVFLOW_TEST_REGISTRY"
        ));

        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::set_var("DEVFLOW_TEST_REGISTRY", "env.local") };
        let config = YamlConfigLoader::parse(content, "devflow.yaml", &LoadOptions::default());
        unsafe { std::env::remove_var("DEVFLOW_TEST_REGISTRY") };

        assert_eq!(config.unwrap().images.get("a").unwrap().image, "env.local/a");
    }

    #[test]
    fn test_profile_applied() {
        let content = r#"
images:
  web:
    image: web
profiles:
  ci:
    images:
      web:
        image: web-ci
"#;
        let options = LoadOptions {
            profile: Some("ci".to_string()),
            ..Default::default()
        };
        let config = YamlConfigLoader::parse(content, "devflow.yaml", &options).unwrap();
        assert_eq!(config.images.get("web").unwrap().image, "web-ci");
    }

    #[test]
    fn test_load_from_directory() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("billing");
        std::fs::create_dir_all(&project).unwrap();

        let missing = YamlConfigLoader.load(&project, &LoadOptions::default()).unwrap_err();
        assert!(matches!(missing.downcast_ref::<DevflowError>(), Some(DevflowError::ConfigNotFound { .. })));

        std::fs::write(project.join("custom.yaml"), "images: {}\n").unwrap();
        let options = LoadOptions {
            config_name: Some("custom.yaml".to_string()),
            ..Default::default()
        };
        let config = YamlConfigLoader.load(&project, &options).unwrap();
        assert_eq!(config.name, "billing");
        assert!(config.images.is_empty());
    }

    #[test]
    fn test_parse_error_is_typed() {
        let err = YamlConfigLoader::parse("images: [unterminated", "devflow.yaml", &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<DevflowError>(), Some(DevflowError::ConfigParseError { .. })));
    }
}
