//! Common setup shared by the CLI commands

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use crate::build::{BuildOptions, BuildRuntime, DefaultBuilderFactory};
use crate::config::{ConfigLoader, GlobalConfig, LoadOptions, ProjectConfig, YamlConfigLoader};
use crate::constants::DEFAULT_CONFIG_FILE;
use crate::core::DevflowError;
use crate::dependency::{DependencyManager, ExecuteOptions, Resolver, SourceFetcher};
use crate::hooks::CommandHooks;
use crate::interrupt::InterruptRegistry;
use crate::kube::{self, LocalContexts};
use crate::utils::fs::find_project_root;
use crate::utils::progress::Spinner;

/// Options selecting and fetching dependencies.
#[derive(Args, Debug, Clone, Default)]
pub struct DependencyArgs {
    /// Only run these dependencies (plain or dot-qualified names)
    #[arg(long = "dependency", value_name = "NAME")]
    pub only: Vec<String>,

    /// Never run these dependencies (plain or dot-qualified names)
    #[arg(long = "skip-dependency", value_name = "NAME")]
    pub skip: Vec<String>,

    /// Do not handle dependencies at all
    #[arg(long)]
    pub skip_dependencies: bool,

    /// Skip dependency edges that would form a cycle instead of failing
    #[arg(long)]
    pub allow_cyclic: bool,

    /// Pull git dependencies that are already checked out
    #[arg(long)]
    pub update_dependencies: bool,
}

/// Options controlling image builds.
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Tag to use instead of the configured tags (repeatable)
    #[arg(short = 't', long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Build only these images of the project (repeatable)
    #[arg(short = 'i', long = "image", value_name = "NAME")]
    pub images: Vec<String>,

    /// Do not push images after building
    #[arg(long)]
    pub skip_push: bool,

    /// Rebuild images even if nothing changed
    #[arg(short = 'b', long)]
    pub force_rebuild: bool,

    /// Build images one after another
    #[arg(long)]
    pub sequential: bool,

    /// Maximum number of images built at the same time (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_concurrent_builds: Option<usize>,
}

impl BuildArgs {
    pub fn to_options(&self, settings: &GlobalConfig) -> BuildOptions {
        BuildOptions {
            tags: self.tags.clone(),
            images: self.images.clone(),
            skip_push: self.skip_push,
            force_rebuild: self.force_rebuild,
            sequential: self.sequential,
            max_concurrent_builds: self.max_concurrent_builds.unwrap_or(settings.max_concurrent_builds),
        }
    }
}

/// Root project, global settings and process-wide state for one command.
#[derive(Debug)]
pub struct CommandContext {
    /// Directory containing the project config
    pub project_dir: PathBuf,
    /// Parsed root project config
    pub config: Arc<ProjectConfig>,
    /// Global settings (`~/.devflow/config.toml`)
    pub settings: GlobalConfig,
    pub interrupts: InterruptRegistry,
    /// Stream dependency output while it runs
    pub verbose: bool,
    /// Hide spinners
    pub no_progress: bool,
}

impl CommandContext {
    /// Locate and load the root project.
    ///
    /// `project` is either a directory or a config file; without it the closest
    /// directory containing `devflow.yaml` at or above the working directory is used.
    pub async fn load(
        project: Option<PathBuf>,
        profile: Option<String>,
        settings_path: Option<PathBuf>,
        interrupts: InterruptRegistry,
    ) -> Result<Self> {
        let mut options = LoadOptions {
            profile,
            ..Default::default()
        };
        let project_dir = match project {
            Some(path) if path.is_file() => {
                options.config_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                path.parent().map(PathBuf::from).unwrap_or_default()
            }
            Some(path) => path,
            None => {
                let cwd = std::env::current_dir().context("Failed to determine current directory")?;
                find_project_root(&cwd).ok_or_else(|| DevflowError::ConfigNotFound {
                    path: cwd.join(DEFAULT_CONFIG_FILE).display().to_string(),
                })?
            }
        };
        let project_dir = if project_dir.as_os_str().is_empty() {
            std::env::current_dir()?
        } else {
            project_dir
        };

        let config = YamlConfigLoader.load(&project_dir, &options)?;
        let settings = GlobalConfig::load_with_optional(settings_path).await?;
        tracing::debug!("Project {} in {}", config.name, project_dir.display());

        Ok(Self {
            project_dir,
            config: Arc::new(config),
            settings,
            interrupts,
            verbose: false,
            no_progress: false,
        })
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn with_no_progress(mut self, no_progress: bool) -> Self {
        self.no_progress = no_progress;
        self
    }

    pub fn spinner(&self, message: impl Into<String>) -> Spinner {
        Spinner::new(message, self.no_progress)
    }

    pub fn resolver(&self, deps: &DependencyArgs) -> Result<Resolver> {
        let fetcher = SourceFetcher::new(
            self.settings.dependency_dir()?,
            deps.update_dependencies || self.settings.update_dependencies,
        );
        Ok(Resolver::new(Arc::new(YamlConfigLoader), fetcher).allow_cyclic(deps.allow_cyclic))
    }

    /// Manager firing the root project's hooks.
    pub fn manager(&self, deps: &DependencyArgs) -> DependencyManager {
        DependencyManager::new(
            Arc::new(CommandHooks::from_config(&self.config, &self.project_dir)),
            ExecuteOptions {
                only: deps.only.clone(),
                skip: deps.skip.clone(),
                verbose: self.verbose,
            },
        )
    }

    /// Build runtime bound to the active kube context.
    pub async fn build_runtime(&self) -> BuildRuntime {
        BuildRuntime {
            factory: Arc::new(DefaultBuilderFactory::new(&self.settings)),
            kube: kube::current_target().await,
            local_contexts: LocalContexts::new(self.settings.local_contexts.clone()),
            interrupts: self.interrupts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ProjectFixture;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_from_directory_and_file() {
        let temp = TempDir::new().unwrap();
        let root = ProjectFixture::new(temp.path()).project("app", &[]).unwrap();
        let settings = temp.path().join("settings.toml");

        let ctx = CommandContext::load(Some(root.clone()), None, Some(settings.clone()), InterruptRegistry::new())
            .await
            .unwrap();
        assert_eq!(ctx.config.name, "app");
        assert_eq!(ctx.project_dir, root);
        assert!(!ctx.no_progress);
        assert!(ctx.with_no_progress(true).spinner("Resolving").is_hidden());

        std::fs::copy(root.join(DEFAULT_CONFIG_FILE), root.join("other.yaml")).unwrap();
        let ctx = CommandContext::load(Some(root.join("other.yaml")), None, Some(settings), InterruptRegistry::new())
            .await
            .unwrap();
        assert_eq!(ctx.project_dir, root);
    }

    #[tokio::test]
    async fn test_missing_project_config() {
        let temp = TempDir::new().unwrap();
        let err = CommandContext::load(
            Some(temp.path().to_path_buf()),
            None,
            Some(temp.path().join("settings.toml")),
            InterruptRegistry::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<DevflowError>(), Some(DevflowError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_build_args_fall_back_to_settings() {
        let settings = GlobalConfig {
            max_concurrent_builds: 3,
            ..Default::default()
        };
        let args = BuildArgs::default();
        assert_eq!(args.to_options(&settings).max_concurrent_builds, 3);

        let args = BuildArgs {
            max_concurrent_builds: Some(1),
            ..Default::default()
        };
        assert_eq!(args.to_options(&settings).max_concurrent_builds, 1);
    }
}
