//! Builds with the local docker daemon.

use anyhow::Result;
use async_trait::async_trait;

use super::{BuildContext, BuildHelper, BuildOutcome, ImageBuilder};
use crate::config::BuilderKind;
use crate::utils::command::ToolCommand;

pub struct DockerBuilder {
    helper: BuildHelper,
}

impl DockerBuilder {
    pub fn new(helper: BuildHelper) -> Self {
        Self { helper }
    }

    fn skip_push(&self, ctx: &BuildContext) -> bool {
        let local_cluster = self
            .helper
            .image
            .build
            .docker
            .as_ref()
            .is_some_and(|docker| docker.skip_push_local_cluster)
            && ctx.is_local_cluster();
        ctx.skip_push || self.helper.image.skip_push || local_cluster
    }

    /// Whether the image of the last build is still in the local daemon.
    async fn previous_image_present(&self, ctx: &BuildContext) -> Option<bool> {
        let entry = ctx.cache.image(&self.helper.config_name);
        if !entry.local_only || entry.tag.is_empty() {
            return None;
        }
        let reference = format!("{}:{}", entry.image_name, entry.tag);
        Some(ToolCommand::docker().args(["image", "inspect", reference.as_str()]).succeeds().await)
    }
}

#[async_trait]
impl ImageBuilder for DockerBuilder {
    fn engine(&self) -> BuilderKind {
        BuilderKind::Docker
    }

    fn helper(&self) -> &BuildHelper {
        &self.helper
    }

    async fn should_rebuild(&self, ctx: &BuildContext, force: bool) -> Result<bool> {
        let present = self.previous_image_present(ctx).await;
        self.helper.should_rebuild(ctx, force, present).await
    }

    async fn build(&self, ctx: &BuildContext) -> Result<BuildOutcome> {
        let helper = &self.helper;
        let override_file = helper.override_dockerfile()?;
        let dockerfile = match &override_file {
            Some(file) => file.path().to_path_buf(),
            None => helper.dockerfile_path(),
        };

        let mut command = ToolCommand::docker().arg("build").current_dir(&helper.project_dir);
        for reference in helper.image_refs() {
            command = command.arg("--tag").arg(reference);
        }
        command = command
            .arg("--file")
            .arg(dockerfile.display().to_string())
            .args(helper.build_flags());
        if let Some(docker) = &helper.image.build.docker {
            command = command.args(docker.args.iter().cloned());
        }
        command
            .arg(helper.context_path().display().to_string())
            .with_context(&helper.config_name)
            .execute_streaming(&ctx.output)
            .await?;

        let skip_push = self.skip_push(ctx);
        if skip_push {
            tracing::info!("Skip pushing image {}", helper.image_name());
        } else {
            for reference in helper.image_refs() {
                tracing::info!("Pushing image {reference}");
                ToolCommand::docker()
                    .args(["push", reference.as_str()])
                    .with_context(&helper.config_name)
                    .execute_streaming(&ctx.output)
                    .await?;
            }
        }

        Ok(BuildOutcome { local_only: skip_push })
    }
}
