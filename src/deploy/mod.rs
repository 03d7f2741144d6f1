//! Deployments.
//!
//! A project lists deployment commands in `devflow.yaml`:
//!
//! ```yaml
//! deployments:
//!   - name: app
//!     command: kubectl apply -f k8s/ --namespace "$DEVFLOW_NAMESPACE"
//! ```
//!
//! [`ScriptDeployer`] runs them in declaration order from the project directory.
//! Each built image is available as `DEVFLOW_IMAGE_<NAME>=<image>:<tag>`, where
//! `<NAME>` is the image config name upper-cased with non-alphanumeric characters
//! replaced by `_`.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::build::BuiltImages;
use crate::config::ProjectConfig;
use crate::core::DevflowError;
use crate::utils::command::ToolCommand;
use crate::utils::output::OutputSink;

/// Everything a deployer needs to deploy one project.
#[derive(Debug, Clone, Copy)]
pub struct DeployTarget<'a> {
    /// Project name for logs: the qualified dependency name or the root project name.
    pub name: &'a str,
    pub project_dir: &'a Path,
    pub config: &'a ProjectConfig,
    /// Namespace override from the dependency descriptor.
    pub namespace: Option<&'a str>,
    pub images: &'a BuiltImages,
    pub output: &'a OutputSink,
}

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, target: &DeployTarget<'_>) -> Result<()>;
}

/// Runs `deployments[].command` through `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptDeployer;

/// Environment variable name for an image config name.
pub fn image_env_name(config_name: &str) -> String {
    let suffix: String = config_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("DEVFLOW_IMAGE_{suffix}")
}

#[async_trait]
impl Deployer for ScriptDeployer {
    async fn deploy(&self, target: &DeployTarget<'_>) -> Result<()> {
        if target.config.deployments.is_empty() {
            tracing::debug!("Nothing to deploy for {}", target.name);
            return Ok(());
        }

        let images: Vec<(String, String)> =
            target.images.iter().map(|(name, image)| (image_env_name(name), image.reference())).collect();

        for deployment in &target.config.deployments {
            tracing::info!("Deploying {} ({})", deployment.name, target.name);
            let mut command = ToolCommand::shell(&deployment.command)
                .current_dir(target.project_dir)
                .envs(images.iter().cloned())
                .with_context(&deployment.name);
            if let Some(namespace) = target.namespace {
                command = command.env("DEVFLOW_NAMESPACE", namespace);
            }
            command.execute_streaming(target.output).await.map_err(|e| DevflowError::DeploymentFailed {
                name: deployment.name.clone(),
                reason: format!("{e:#}"),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ImageRef;
    use crate::config::DeploymentConfig;
    use tempfile::TempDir;

    fn config(commands: &[(&str, &str)]) -> ProjectConfig {
        ProjectConfig {
            name: "app".to_string(),
            deployments: commands
                .iter()
                .map(|(name, command)| DeploymentConfig {
                    name: name.to_string(),
                    command: command.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_env_name() {
        assert_eq!(image_env_name("web"), "DEVFLOW_IMAGE_WEB");
        assert_eq!(image_env_name("api-server.v2"), "DEVFLOW_IMAGE_API_SERVER_V2");
    }

    #[tokio::test]
    async fn test_runs_commands_in_order_with_environment() {
        let temp = TempDir::new().unwrap();
        let config = config(&[
            ("first", "echo \"$DEVFLOW_IMAGE_WEB $DEVFLOW_NAMESPACE\" > out.txt"),
            ("second", "echo done >> out.txt"),
        ]);
        let mut images = BuiltImages::new();
        images.insert(
            "web",
            ImageRef {
                image_name: "registry/web".to_string(),
                tag: "abc".to_string(),
            },
        );
        let output = OutputSink::discard();
        let target = DeployTarget {
            name: "app",
            project_dir: temp.path(),
            config: &config,
            namespace: Some("staging"),
            images: &images,
            output: &output,
        };

        ScriptDeployer.deploy(&target).await.unwrap();

        let written = std::fs::read_to_string(temp.path().join("out.txt")).unwrap();
        assert_eq!(written, "registry/web:abc staging\ndone\n");
    }

    #[tokio::test]
    async fn test_failure_names_deployment() {
        let temp = TempDir::new().unwrap();
        let config = config(&[("broken", "exit 4"), ("never", "touch never")]);
        let images = BuiltImages::new();
        let output = OutputSink::discard();
        let target = DeployTarget {
            name: "app",
            project_dir: temp.path(),
            config: &config,
            namespace: None,
            images: &images,
            output: &output,
        };

        let err = ScriptDeployer.deploy(&target).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DevflowError>(),
            Some(DevflowError::DeploymentFailed { name, .. }) if name == "broken"
        ));
        assert!(!temp.path().join("never").exists());
    }
}
