//! Deploy the project and its dependencies.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::sync::Arc;

use super::common::{BuildArgs, CommandContext, DependencyArgs};
use crate::build::BuiltImages;
use crate::deploy::{DeployTarget, Deployer, ScriptDeployer};
use crate::dependency::{BuildDependencies, DeployDependencies};
use crate::utils::output::OutputSink;

/// Build and deploy the project, dependencies first
#[derive(Args, Debug)]
pub struct DeployCommand {
    /// Deploy without building any images
    #[arg(long)]
    skip_build: bool,

    /// Namespace passed to the project's deployments as `DEVFLOW_NAMESPACE`
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    #[command(flatten)]
    build: BuildArgs,

    #[command(flatten)]
    deps: DependencyArgs,
}

impl DeployCommand {
    pub async fn execute(self, ctx: CommandContext) -> Result<()> {
        let options = self.build.to_options(&ctx.settings);
        let runtime = ctx.build_runtime().await;
        let deployer: Arc<dyn Deployer> = Arc::new(ScriptDeployer);

        let mut registry = BuiltImages::new();
        if !self.deps.skip_dependencies {
            let mut resolver = ctx.resolver(&self.deps)?;
            let build = (!self.skip_build).then(|| BuildDependencies::new(runtime.clone(), options.clone()));
            let mut action = DeployDependencies::new(build, deployer.clone());
            ctx.manager(&self.deps).handle_dependencies(&mut resolver, &ctx.project_dir, &ctx.config, &mut action).await?;
            registry = action.registry().clone();
        }

        let output = OutputSink::log();
        if !self.skip_build {
            runtime.build_project(&ctx.project_dir, ctx.config.clone(), &options, output.clone(), &mut registry).await?;
        }

        let target = DeployTarget {
            name: &ctx.config.name,
            project_dir: &ctx.project_dir,
            config: &ctx.config,
            namespace: self.namespace.as_deref(),
            images: &registry,
            output: &output,
        };
        deployer.deploy(&target).await?;

        println!("{} {}", "Deployed".green().bold(), ctx.config.name);
        Ok(())
    }
}
