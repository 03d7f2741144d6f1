//! Global user settings (`~/.devflow/config.toml`).
//!
//! Settings apply to every project the user works on: where git dependencies are
//! cloned, the default build concurrency, whether the docker builder may fall back to
//! in-cluster builds, and which kube contexts count as local clusters.
//!
//! The file location can be overridden with the `DEVFLOW_CONFIG_PATH` environment
//! variable or the CLI's `--config` flag. A missing file means defaults.
//!
//! ```toml
//! dependency_dir = "~/.devflow/dependencies"
//! max_concurrent_builds = 4
//! disable_builder_fallback = false
//! local_contexts = ["my-dev-cluster"]
//! kaniko_namespace = "builds"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable overriding the settings file location.
pub const CONFIG_PATH_ENV: &str = "DEVFLOW_CONFIG_PATH";

const fn default_update_dependencies() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Directory for cloned git dependencies. Defaults to `~/.devflow/dependencies`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_dir: Option<String>,

    /// Default maximum number of concurrent image builds. `0` means unbounded.
    #[serde(default)]
    pub max_concurrent_builds: usize,

    /// Fail instead of building in-cluster when no docker daemon is reachable.
    #[serde(default)]
    pub disable_builder_fallback: bool,

    /// Pull unpinned git dependencies on every run.
    #[serde(default = "default_update_dependencies")]
    pub update_dependencies: bool,

    /// Extra kube context names treated as local clusters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_contexts: Vec<String>,

    /// Namespace for in-cluster build pods when the project does not set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kaniko_namespace: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            dependency_dir: None,
            max_concurrent_builds: 0,
            disable_builder_fallback: false,
            update_dependencies: default_update_dependencies(),
            local_contexts: Vec::new(),
            kaniko_namespace: None,
        }
    }
}

impl GlobalConfig {
    /// Load from the default location, or defaults if the file does not exist.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` if given, else from the default location.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("No global config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read global config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse global config from {}", path.display()))
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize global config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write global config to {}", path.display()))
    }

    /// `$DEVFLOW_CONFIG_PATH`, else `~/.devflow/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        Ok(devflow_home()?.join("config.toml"))
    }

    /// Directory for cloned git dependencies with `~` expanded.
    pub fn dependency_dir(&self) -> Result<PathBuf> {
        match &self.dependency_dir {
            Some(dir) => {
                let expanded = shellexpand::full(dir)
                    .with_context(|| format!("Failed to expand dependency_dir '{dir}'"))?;
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => Ok(devflow_home()?.join("dependencies")),
        }
    }
}

/// `~/.devflow`
pub fn devflow_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
        .join(".devflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = GlobalConfig::load_with_optional(Some(temp.path().join("none.toml"))).await.unwrap();
        assert_eq!(config, GlobalConfig::default());
        assert!(config.update_dependencies);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let config = GlobalConfig {
            dependency_dir: Some("/tmp/deps".to_string()),
            max_concurrent_builds: 3,
            disable_builder_fallback: true,
            update_dependencies: false,
            local_contexts: vec!["dev".to_string()],
            kaniko_namespace: Some("builds".to_string()),
        };

        config.save_to(&path).await.unwrap();
        let loaded = GlobalConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.dependency_dir().unwrap(), PathBuf::from("/tmp/deps"));
    }

    #[tokio::test]
    async fn test_parse_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_concurrent_builds = 2\n").unwrap();

        let config = GlobalConfig::load_from(&path).await.unwrap();
        assert_eq!(config.max_concurrent_builds, 2);
        assert!(!config.disable_builder_fallback);
        assert!(config.update_dependencies);
    }

    #[test]
    #[serial]
    fn test_default_path_honors_env_override() {
        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::set_var(CONFIG_PATH_ENV, "/custom/devflow.toml") };
        let path = GlobalConfig::default_path().unwrap();
        unsafe { std::env::remove_var(CONFIG_PATH_ENV) };

        assert_eq!(path, PathBuf::from("/custom/devflow.toml"));
    }
}
