//! Builds with BuildKit through `docker buildx build`.

use anyhow::Result;
use async_trait::async_trait;

use super::{BuildContext, BuildHelper, BuildOutcome, ImageBuilder};
use crate::config::BuilderKind;
use crate::utils::command::ToolCommand;

pub struct BuildKitBuilder {
    helper: BuildHelper,
}

impl BuildKitBuilder {
    pub fn new(helper: BuildHelper) -> Self {
        Self { helper }
    }

    fn command(&self, dockerfile: &str, push: bool) -> ToolCommand {
        let helper = &self.helper;
        let mut command = ToolCommand::docker().args(["buildx", "build"]).current_dir(&helper.project_dir);
        for reference in helper.image_refs() {
            command = command.arg("--tag").arg(reference);
        }
        command = command
            .arg("--file")
            .arg(dockerfile)
            .args(helper.build_flags())
            .arg(if push { "--push" } else { "--load" });
        if let Some(buildkit) = &helper.image.build.buildkit {
            command = command.args(buildkit.args.iter().cloned());
        }
        command.arg(helper.context_path().display().to_string())
    }
}

#[async_trait]
impl ImageBuilder for BuildKitBuilder {
    fn engine(&self) -> BuilderKind {
        BuilderKind::BuildKit
    }

    fn helper(&self) -> &BuildHelper {
        &self.helper
    }

    async fn should_rebuild(&self, ctx: &BuildContext, force: bool) -> Result<bool> {
        self.helper.should_rebuild(ctx, force, None).await
    }

    async fn build(&self, ctx: &BuildContext) -> Result<BuildOutcome> {
        let override_file = self.helper.override_dockerfile()?;
        let dockerfile = match &override_file {
            Some(file) => file.path().display().to_string(),
            None => self.helper.dockerfile_path().display().to_string(),
        };
        let push = !(ctx.skip_push || self.helper.image.skip_push);

        self.command(&dockerfile, push)
            .with_context(&self.helper.config_name)
            .execute_streaming(&ctx.output)
            .await?;

        Ok(BuildOutcome { local_only: !push })
    }
}
