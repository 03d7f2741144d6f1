//! Image builder backends.
//!
//! Every image config is built by one [`ImageBuilder`], chosen by a
//! [`BuilderFactory`] from the `build:` section of the image config:
//!
//! | Section | Backend |
//! |---|---|
//! | `custom` | [`custom::CustomBuilder`], a user command |
//! | `buildkit` | [`buildkit::BuildKitBuilder`], `docker buildx build` |
//! | `kaniko` | [`kaniko::KanikoBuilder`], a build pod in the cluster |
//! | none / `docker` | [`docker::DockerBuilder`], the local docker daemon |
//!
//! When no docker daemon is reachable, docker images are built with kaniko instead
//! unless builder fallback is disabled in the global settings.
//!
//! All backends share [`BuildHelper`] for paths, tags and the rebuild decision.

pub mod buildkit;
pub mod custom;
pub mod docker;
pub mod helper;
pub mod kaniko;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::cache::LocalCache;
use crate::config::{BuilderKind, GlobalConfig};
use crate::constants::DOCKER_PROBE_TIMEOUT;
use crate::core::DevflowError;
use crate::interrupt::InterruptRegistry;
use crate::kube::{KubeTarget, LocalContexts};
use crate::utils::command::ToolCommand;
use crate::utils::output::OutputSink;

pub use helper::BuildHelper;

/// Run-wide environment shared by all builds of one project.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub cache: Arc<LocalCache>,
    /// Cluster targeted by this run, if kubectl is configured.
    pub kube: Option<KubeTarget>,
    pub local_contexts: LocalContexts,
    pub interrupts: InterruptRegistry,
    pub output: OutputSink,
    /// Skip pushing for every image of the run.
    pub skip_push: bool,
}

impl BuildContext {
    pub fn new(cache: Arc<LocalCache>) -> Self {
        Self {
            cache,
            kube: None,
            local_contexts: LocalContexts::default(),
            interrupts: InterruptRegistry::new(),
            output: OutputSink::log(),
            skip_push: false,
        }
    }

    /// The targeted cluster runs on the local docker daemon.
    pub fn is_local_cluster(&self) -> bool {
        self.kube.as_ref().is_some_and(|target| self.local_contexts.is_local(&target.context))
    }

    /// Same context writing to a different output.
    #[must_use]
    pub fn with_output(&self, output: OutputSink) -> Self {
        Self {
            output,
            ..self.clone()
        }
    }
}

/// What a finished build reports back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    /// The image was not pushed and only exists in the local daemon.
    pub local_only: bool,
}

/// A backend able to build one image config.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    fn engine(&self) -> BuilderKind;

    fn helper(&self) -> &BuildHelper;

    /// Whether the image has to be built in this run. Records the new input hashes
    /// in the context's cache.
    async fn should_rebuild(&self, ctx: &BuildContext, force: bool) -> Result<bool>;

    async fn build(&self, ctx: &BuildContext) -> Result<BuildOutcome>;
}

/// Chooses a backend for an image config.
#[async_trait]
pub trait BuilderFactory: Send + Sync {
    async fn create(&self, helper: BuildHelper) -> Result<Box<dyn ImageBuilder>>;
}

/// Factory selecting backends from the image config and the global settings.
#[derive(Debug, Default)]
pub struct DefaultBuilderFactory {
    disable_fallback: bool,
    kaniko_namespace: Option<String>,
    docker_reachable: OnceCell<bool>,
}

impl DefaultBuilderFactory {
    pub fn new(settings: &GlobalConfig) -> Self {
        Self {
            disable_fallback: settings.disable_builder_fallback,
            kaniko_namespace: settings.kaniko_namespace.clone(),
            docker_reachable: OnceCell::new(),
        }
    }

    /// Use a known daemon status instead of probing.
    #[must_use]
    pub fn with_daemon_status(mut self, reachable: bool) -> Self {
        self.docker_reachable = OnceCell::new_with(Some(reachable));
        self
    }

    async fn docker_reachable(&self) -> bool {
        *self
            .docker_reachable
            .get_or_init(|| async {
                if which::which("docker").is_err() {
                    tracing::debug!(target: "devflow::build", "docker binary not found in PATH");
                    return false;
                }
                ToolCommand::docker()
                    .args(["info", "--format", "{{.ServerVersion}}"])
                    .with_timeout(Some(DOCKER_PROBE_TIMEOUT))
                    .succeeds()
                    .await
            })
            .await
    }

    fn kaniko(&self, helper: BuildHelper) -> Box<dyn ImageBuilder> {
        Box::new(kaniko::KanikoBuilder::new(helper, self.kaniko_namespace.clone()))
    }
}

#[async_trait]
impl BuilderFactory for DefaultBuilderFactory {
    async fn create(&self, helper: BuildHelper) -> Result<Box<dyn ImageBuilder>> {
        let builder: Box<dyn ImageBuilder> = match helper.image.build.kind() {
            BuilderKind::Custom => Box::new(custom::CustomBuilder::new(helper)?),
            BuilderKind::BuildKit => Box::new(buildkit::BuildKitBuilder::new(helper)),
            BuilderKind::Kaniko => self.kaniko(helper),
            BuilderKind::Docker => {
                if self.docker_reachable().await {
                    Box::new(docker::DockerBuilder::new(helper))
                } else if self.disable_fallback {
                    return Err(DevflowError::DockerUnavailable.into());
                } else {
                    tracing::warn!(
                        "Docker daemon is not reachable, building image {} in the cluster",
                        helper.config_name
                    );
                    self.kaniko(helper)
                }
            }
        };
        tracing::debug!(
            target: "devflow::build",
            "Using {} builder for image {}",
            builder.engine(),
            builder.helper().config_name
        );
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildConfig, CustomBuildConfig, ImageConfig, KanikoConfig};
    use std::path::Path;

    fn helper(build: BuildConfig) -> BuildHelper {
        let image = ImageConfig {
            image: "registry.example.com/web".to_string(),
            build,
            ..Default::default()
        };
        BuildHelper::new("web", image, Path::new("/project"), vec!["t1".to_string()])
    }

    #[tokio::test]
    async fn test_selection_by_declared_type() {
        let factory = DefaultBuilderFactory::default().with_daemon_status(true);

        let custom = BuildConfig {
            custom: Some(CustomBuildConfig {
                command: "make image".to_string(),
            }),
            kaniko: Some(KanikoConfig::default()),
            ..Default::default()
        };
        assert_eq!(factory.create(helper(custom)).await.unwrap().engine(), BuilderKind::Custom);

        let kaniko = BuildConfig {
            kaniko: Some(KanikoConfig::default()),
            ..Default::default()
        };
        assert_eq!(factory.create(helper(kaniko)).await.unwrap().engine(), BuilderKind::Kaniko);

        assert_eq!(factory.create(helper(BuildConfig::default())).await.unwrap().engine(), BuilderKind::Docker);
    }

    #[tokio::test]
    async fn test_fallback_without_daemon() {
        let factory = DefaultBuilderFactory::default().with_daemon_status(false);
        assert_eq!(factory.create(helper(BuildConfig::default())).await.unwrap().engine(), BuilderKind::Kaniko);

        let settings = GlobalConfig {
            disable_builder_fallback: true,
            ..Default::default()
        };
        let strict = DefaultBuilderFactory::new(&settings).with_daemon_status(false);
        let err = strict.create(helper(BuildConfig::default())).await.err().unwrap();
        assert!(matches!(err.downcast_ref::<DevflowError>(), Some(DevflowError::DockerUnavailable)));
    }
}
