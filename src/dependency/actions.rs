//! The `resolve`, `build` and `deploy` dependency actions.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::ResolvedDependency;
use super::manager::{DependencyAction, ExecutionContext};
use crate::build::{BuildOptions, BuildRuntime, BuiltImages};
use crate::deploy::{DeployTarget, Deployer};

/// Does nothing per dependency; walking the tree only fires the `resolve` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResolveDependencies;

#[async_trait]
impl DependencyAction for ResolveDependencies {
    fn name(&self) -> &str {
        "resolve"
    }

    async fn execute(&mut self, _ctx: &ExecutionContext, _dependency: &ResolvedDependency) -> Result<()> {
        Ok(())
    }
}

/// Builds the images of every dependency.
///
/// Images built along the way are collected in [`BuildDependencies::registry`].
pub struct BuildDependencies {
    runtime: BuildRuntime,
    options: BuildOptions,
    registry: BuiltImages,
}

impl BuildDependencies {
    /// `options.images` names images of the root project and is ignored here.
    pub fn new(runtime: BuildRuntime, options: BuildOptions) -> Self {
        Self {
            runtime,
            options: BuildOptions {
                images: Vec::new(),
                ..options
            },
            registry: BuiltImages::new(),
        }
    }

    pub fn registry(&self) -> &BuiltImages {
        &self.registry
    }

    pub fn into_registry(self) -> BuiltImages {
        self.registry
    }

    async fn build(&mut self, ctx: &ExecutionContext, dependency: &ResolvedDependency) -> Result<BuiltImages> {
        if dependency.config.images.is_empty() {
            tracing::debug!("Dependency {} has no images", ctx.qualified_name);
            return Ok(BuiltImages::new());
        }
        self.runtime
            .build_project(
                &dependency.local_path,
                dependency.config.clone(),
                &self.options,
                ctx.output.clone(),
                &mut self.registry,
            )
            .await
    }
}

#[async_trait]
impl DependencyAction for BuildDependencies {
    fn name(&self) -> &str {
        "build"
    }

    async fn execute(&mut self, ctx: &ExecutionContext, dependency: &ResolvedDependency) -> Result<()> {
        let built = self.build(ctx, dependency).await?;
        if !built.is_empty() {
            tracing::info!("Built {} image(s) of dependency {}", built.len(), ctx.qualified_name);
        }
        Ok(())
    }
}

/// Builds (unless disabled) and deploys every dependency.
pub struct DeployDependencies {
    build: Option<BuildDependencies>,
    deployer: Arc<dyn Deployer>,
    registry: BuiltImages,
}

impl DeployDependencies {
    /// `build` is `None` when images must not be built before deploying.
    pub fn new(build: Option<BuildDependencies>, deployer: Arc<dyn Deployer>) -> Self {
        Self {
            build,
            deployer,
            registry: BuiltImages::new(),
        }
    }

    /// Images built for all dependencies so far.
    pub fn registry(&self) -> &BuiltImages {
        &self.registry
    }
}

#[async_trait]
impl DependencyAction for DeployDependencies {
    fn name(&self) -> &str {
        "deploy"
    }

    async fn execute(&mut self, ctx: &ExecutionContext, dependency: &ResolvedDependency) -> Result<()> {
        if let Some(build) = self.build.as_mut() {
            if !dependency.descriptor.skip_build {
                build.build(ctx, dependency).await?;
                self.registry.merge(build.registry());
            }
        }

        let target = DeployTarget {
            name: &ctx.qualified_name,
            project_dir: &dependency.local_path,
            config: &dependency.config,
            namespace: dependency.descriptor.namespace.as_deref(),
            images: &self.registry,
            output: &ctx.output,
        };
        self.deployer.deploy(&target).await
    }
}
