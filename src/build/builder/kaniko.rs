//! In-cluster builds with kaniko.
//!
//! A build runs in a dedicated pod:
//!
//! 1. create the pod; its init container waits for a marker file in a shared volume
//! 2. poll until the init container is running (hard timeout)
//! 3. copy the filtered build context into the shared volume and create the marker
//! 4. stream the kaniko container's logs until it terminates
//! 5. delete the pod
//!
//! Pod deletion is registered with the interrupt registry so an interrupted run
//! does not leave build pods behind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Instant;
use tempfile::TempDir;

use super::{BuildContext, BuildHelper, BuildOutcome, ImageBuilder};
use crate::build::hash;
use crate::config::BuilderKind;
use crate::constants::{BUILD_POD_POLL_INTERVAL, BUILD_POD_READY_TIMEOUT, KUBECTL_QUERY_TIMEOUT, RANDOM_TAG_LENGTH};
use crate::core::DevflowError;
use crate::utils::command::ToolCommand;
use crate::utils::fs::ensure_dir;

const DEFAULT_EXECUTOR_IMAGE: &str = "gcr.io/kaniko-project/executor:v1.23.2";
const INIT_IMAGE: &str = "busybox:1.36";
const WORKSPACE: &str = "/workspace";
const READY_MARKER: &str = ".devflow-ready";
const STAGED_DOCKERFILE: &str = ".devflow-Dockerfile";

pub struct KanikoBuilder {
    helper: BuildHelper,
    default_namespace: Option<String>,
}

impl KanikoBuilder {
    /// `default_namespace` comes from the global settings.
    pub fn new(helper: BuildHelper, default_namespace: Option<String>) -> Self {
        Self {
            helper,
            default_namespace,
        }
    }

    /// Image config namespace, then the global setting, then the context's namespace.
    fn namespace(&self, ctx: &BuildContext) -> String {
        self.helper
            .image
            .build
            .kaniko
            .as_ref()
            .and_then(|kaniko| kaniko.namespace.clone())
            .or_else(|| self.default_namespace.clone())
            .or_else(|| ctx.kube.as_ref().and_then(|target| target.namespace.clone()))
            .unwrap_or_else(|| "default".to_string())
    }

    fn executor_args(&self, push: bool) -> Vec<String> {
        let helper = &self.helper;
        let mut args = vec![
            format!("--dockerfile={WORKSPACE}/{STAGED_DOCKERFILE}"),
            format!("--context=dir://{WORKSPACE}"),
        ];
        for reference in helper.image_refs() {
            args.push(format!("--destination={reference}"));
        }
        for (key, value) in &helper.image.build_args {
            args.push(format!("--build-arg={key}={value}"));
        }
        if let Some(target) = &helper.image.target {
            args.push(format!("--target={target}"));
        }
        if !push {
            args.push("--no-push".to_string());
        }
        if let Some(kaniko) = &helper.image.build.kaniko {
            args.extend(kaniko.args.iter().cloned());
        }
        args
    }

    fn pod_manifest(&self, pod: &str, namespace: &str, push: bool) -> serde_json::Value {
        let executor = self
            .helper
            .image
            .build
            .kaniko
            .as_ref()
            .and_then(|kaniko| kaniko.image.clone())
            .unwrap_or_else(|| DEFAULT_EXECUTOR_IMAGE.to_string());
        let wait = format!("while [ ! -f {WORKSPACE}/{READY_MARKER} ]; do sleep 1; done");

        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": pod,
                "namespace": namespace,
                "labels": { "app.kubernetes.io/managed-by": "devflow" }
            },
            "spec": {
                "restartPolicy": "Never",
                "initContainers": [{
                    "name": "context",
                    "image": INIT_IMAGE,
                    "command": ["sh", "-c", wait],
                    "volumeMounts": [{ "name": "workspace", "mountPath": WORKSPACE }]
                }],
                "containers": [{
                    "name": "kaniko",
                    "image": executor,
                    "args": self.executor_args(push),
                    "volumeMounts": [{ "name": "workspace", "mountPath": WORKSPACE }]
                }],
                "volumes": [{ "name": "workspace", "emptyDir": {} }]
            }
        })
    }

    /// Copy the files docker would send, plus the effective Dockerfile, into a new
    /// temporary directory.
    fn stage_context(&self) -> Result<TempDir> {
        let helper = &self.helper;
        let staging = TempDir::new().context("Failed to create staging directory")?;
        let context = helper.context_path();
        let (rules, keep) = helper.context_rules()?;

        for (relative, source) in hash::context_files(&context, &rules, &keep)? {
            let target = staging.path().join(&relative);
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            std::fs::copy(&source, &target).with_context(|| format!("Failed to stage {}", source.display()))?;
        }
        std::fs::write(staging.path().join(STAGED_DOCKERFILE), helper.dockerfile_content()?)
            .context("Failed to stage Dockerfile")?;
        Ok(staging)
    }

    async fn pod_field(pod: &str, namespace: &str, jsonpath: &str) -> Result<String> {
        ToolCommand::kubectl()
            .args(["get", "pod", pod, "--namespace", namespace, "--output"])
            .arg(format!("jsonpath={jsonpath}"))
            .with_timeout(Some(KUBECTL_QUERY_TIMEOUT))
            .execute_stdout()
            .await
    }

    async fn wait_for_init_container(&self, pod: &str, namespace: &str) -> Result<()> {
        let start = Instant::now();
        loop {
            let running = Self::pod_field(pod, namespace, "{.status.initContainerStatuses[0].state.running}").await?;
            if !running.is_empty() {
                return Ok(());
            }
            let waiting =
                Self::pod_field(pod, namespace, "{.status.initContainerStatuses[0].state.waiting.reason}").await?;
            if matches!(waiting.as_str(), "ErrImagePull" | "ImagePullBackOff" | "CreateContainerConfigError") {
                anyhow::bail!("Build pod {pod} cannot start: {waiting}");
            }
            if start.elapsed() >= BUILD_POD_READY_TIMEOUT {
                return Err(DevflowError::BuildPodTimeout {
                    pod: pod.to_string(),
                    seconds: BUILD_POD_READY_TIMEOUT.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(BUILD_POD_POLL_INTERVAL).await;
        }
    }

    async fn wait_for_completion(&self, pod: &str, namespace: &str) -> Result<String> {
        let start = Instant::now();
        loop {
            let phase = Self::pod_field(pod, namespace, "{.status.phase}").await?;
            if phase == "Succeeded" || phase == "Failed" {
                return Ok(phase);
            }
            if start.elapsed() >= BUILD_POD_READY_TIMEOUT {
                return Err(DevflowError::BuildPodTimeout {
                    pod: pod.to_string(),
                    seconds: BUILD_POD_READY_TIMEOUT.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(BUILD_POD_POLL_INTERVAL).await;
        }
    }

    async fn run_pod(&self, ctx: &BuildContext, pod: &str, namespace: &str, push: bool) -> Result<()> {
        let manifest = self.pod_manifest(pod, namespace, push);
        let manifest_file = tempfile::Builder::new().prefix("devflow-pod-").suffix(".json").tempfile()?;
        std::fs::write(manifest_file.path(), serde_json::to_vec_pretty(&manifest)?)?;

        ToolCommand::kubectl()
            .args(["create", "--filename"])
            .arg(manifest_file.path().display().to_string())
            .with_timeout(Some(KUBECTL_QUERY_TIMEOUT))
            .execute_success()
            .await?;

        self.wait_for_init_container(pod, namespace).await?;

        let staging = {
            let builder = KanikoBuilder::new(self.helper.clone(), self.default_namespace.clone());
            tokio::task::spawn_blocking(move || builder.stage_context()).await.context("Staging task failed")??
        };
        ToolCommand::kubectl()
            .args(["cp", "--namespace", namespace, "--container", "context"])
            .arg(format!("{}/.", staging.path().display()))
            .arg(format!("{pod}:{WORKSPACE}"))
            .with_context(&self.helper.config_name)
            .execute_streaming(&ctx.output)
            .await?;
        ToolCommand::kubectl()
            .args(["exec", pod, "--namespace", namespace, "--container", "context", "--", "touch"])
            .arg(format!("{WORKSPACE}/{READY_MARKER}"))
            .with_timeout(Some(KUBECTL_QUERY_TIMEOUT))
            .execute_success()
            .await?;

        // Ends when the kaniko container terminates.
        ToolCommand::kubectl()
            .args(["logs", "--follow", pod, "--namespace", namespace, "--container", "kaniko"])
            .with_context(&self.helper.config_name)
            .execute_streaming(&ctx.output)
            .await?;

        let phase = self.wait_for_completion(pod, namespace).await?;
        if phase != "Succeeded" {
            anyhow::bail!("Build pod {pod} finished with phase {phase}");
        }
        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for KanikoBuilder {
    fn engine(&self) -> BuilderKind {
        BuilderKind::Kaniko
    }

    fn helper(&self) -> &BuildHelper {
        &self.helper
    }

    async fn should_rebuild(&self, ctx: &BuildContext, force: bool) -> Result<bool> {
        self.helper.should_rebuild(ctx, force, None).await
    }

    async fn build(&self, ctx: &BuildContext) -> Result<BuildOutcome> {
        let namespace = self.namespace(ctx);
        let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(RANDOM_TAG_LENGTH).collect();
        let pod = format!("devflow-build-{suffix}");
        let push = !(ctx.skip_push || self.helper.image.skip_push);

        let cleanup = {
            let pod = pod.clone();
            let namespace = namespace.clone();
            ctx.interrupts.register(move || {
                tracing::info!("Deleting build pod {pod}");
                let status = std::process::Command::new("kubectl")
                    .args(["delete", "pod", &pod, "--namespace", &namespace, "--wait=false", "--ignore-not-found"])
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status();
                if let Err(e) = status {
                    tracing::warn!("Failed to delete build pod {pod}: {e}");
                }
            })
        };

        tracing::info!("Building image {} in pod {namespace}/{pod}", self.helper.image_name());
        let result = self.run_pod(ctx, &pod, &namespace, push).await;
        cleanup.run_now();
        result?;

        Ok(BuildOutcome::default())
    }
}
