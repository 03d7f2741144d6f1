//! Builds with a user-provided command.
//!
//! The command runs through `sh -c` in the project directory with the image
//! coordinates in the environment:
//!
//! | Variable | Value |
//! |---|---|
//! | `DEVFLOW_IMAGE` | image name without tag |
//! | `DEVFLOW_TAG` | primary tag |
//! | `DEVFLOW_TAGS` | all tags, space separated |
//! | `DEVFLOW_CONTEXT` | absolute build context path |
//! | `DEVFLOW_DOCKERFILE` | absolute Dockerfile path |
//! | `DEVFLOW_SKIP_PUSH` | `true` when pushing is disabled |

use anyhow::Result;
use async_trait::async_trait;

use super::{BuildContext, BuildHelper, BuildOutcome, ImageBuilder};
use crate::config::BuilderKind;
use crate::core::DevflowError;
use crate::utils::command::ToolCommand;

pub struct CustomBuilder {
    helper: BuildHelper,
    command: String,
}

impl CustomBuilder {
    pub fn new(helper: BuildHelper) -> Result<Self> {
        let command = helper
            .image
            .build
            .custom
            .as_ref()
            .map(|custom| custom.command.trim().to_string())
            .filter(|command| !command.is_empty())
            .ok_or_else(|| DevflowError::ConfigError {
                message: format!("Image {} has an empty custom build command", helper.config_name),
            })?;
        Ok(Self { helper, command })
    }
}

#[async_trait]
impl ImageBuilder for CustomBuilder {
    fn engine(&self) -> BuilderKind {
        BuilderKind::Custom
    }

    fn helper(&self) -> &BuildHelper {
        &self.helper
    }

    async fn should_rebuild(&self, ctx: &BuildContext, force: bool) -> Result<bool> {
        self.helper.should_rebuild(ctx, force, None).await
    }

    async fn build(&self, ctx: &BuildContext) -> Result<BuildOutcome> {
        let helper = &self.helper;
        let skip_push = ctx.skip_push || helper.image.skip_push;

        ToolCommand::shell(&self.command)
            .current_dir(&helper.project_dir)
            .env("DEVFLOW_IMAGE", helper.image_name())
            .env("DEVFLOW_TAG", helper.primary_tag())
            .env("DEVFLOW_TAGS", helper.tags.join(" "))
            .env("DEVFLOW_CONTEXT", helper.context_path().display().to_string())
            .env("DEVFLOW_DOCKERFILE", helper.dockerfile_path().display().to_string())
            .env("DEVFLOW_SKIP_PUSH", skip_push.to_string())
            .with_context(&helper.config_name)
            .execute_streaming(&ctx.output)
            .await?;

        Ok(BuildOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::cache::LocalCache;
    use crate::config::{CustomBuildConfig, ImageConfig};
    use crate::utils::output::OutputSink;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn helper(dir: &std::path::Path, command: &str) -> BuildHelper {
        let mut image = ImageConfig {
            image: "registry.example.com/tool".to_string(),
            ..Default::default()
        };
        image.build.custom = Some(CustomBuildConfig {
            command: command.to_string(),
        });
        BuildHelper::new("tool", image, dir, vec!["abc".to_string(), "latest".to_string()])
    }

    #[tokio::test]
    async fn test_command_receives_image_environment() {
        let temp = TempDir::new().unwrap();
        let builder = CustomBuilder::new(helper(temp.path(), "echo \"$DEVFLOW_IMAGE:$DEVFLOW_TAG ($DEVFLOW_TAGS)\"")).unwrap();
        let (sink, buffer) = OutputSink::buffered();
        let ctx = BuildContext::new(Arc::new(LocalCache::in_memory())).with_output(sink);

        let outcome = builder.build(&ctx).await.unwrap();

        assert!(!outcome.local_only);
        assert_eq!(buffer.contents(), "registry.example.com/tool:abc (abc latest)\n");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let temp = TempDir::new().unwrap();
        let builder = CustomBuilder::new(helper(temp.path(), "echo no space left; exit 1")).unwrap();
        let ctx = BuildContext::new(Arc::new(LocalCache::in_memory())).with_output(OutputSink::discard());

        let err = builder.build(&ctx).await.unwrap_err();
        assert!(format!("{err:#}").contains("sh script failed"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(CustomBuilder::new(helper(temp.path(), "  ")).is_err());
    }
}
