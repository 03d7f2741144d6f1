//! Build the images of the project and its dependencies.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::{BuildArgs, CommandContext, DependencyArgs};
use crate::build::BuiltImages;
use crate::dependency::BuildDependencies;
use crate::utils::output::OutputSink;

/// Build all images, dependencies first
#[derive(Args, Debug)]
pub struct BuildCommand {
    #[command(flatten)]
    build: BuildArgs,

    #[command(flatten)]
    deps: DependencyArgs,
}

impl BuildCommand {
    pub async fn execute(self, ctx: CommandContext) -> Result<()> {
        let options = self.build.to_options(&ctx.settings);
        let runtime = ctx.build_runtime().await;

        let mut registry = BuiltImages::new();
        if !self.deps.skip_dependencies {
            let mut resolver = ctx.resolver(&self.deps)?;
            let mut action = BuildDependencies::new(runtime.clone(), options.clone());
            ctx.manager(&self.deps).handle_dependencies(&mut resolver, &ctx.project_dir, &ctx.config, &mut action).await?;
            registry = action.into_registry();
        }

        let built = runtime
            .build_project(&ctx.project_dir, ctx.config.clone(), &options, OutputSink::log(), &mut registry)
            .await?;

        if registry.is_empty() {
            println!("{}", "No images were built".yellow());
        } else {
            println!("{} {} image(s)", "Built".green().bold(), registry.len());
            for (name, image) in registry.iter() {
                let marker = if built.get(name).is_some() { "" } else { " (dependency)" };
                println!("  {name}: {}{marker}", image.reference());
            }
        }
        Ok(())
    }
}
