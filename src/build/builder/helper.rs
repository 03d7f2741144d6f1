//! State and logic shared by every image builder.
//!
//! A [`BuildHelper`] is created per selected image by the build controller and handed
//! to the [`BuilderFactory`](super::BuilderFactory). Backends only add the engine
//! specific parts: how to run the build, whether to push, and whether the image is
//! still present locally.
//!
//! # Rebuild check
//!
//! [`BuildHelper::should_rebuild`] gathers the inputs of
//! [`rebuild::decide`](crate::build::rebuild::decide):
//!
//! - Dockerfile hash and, unless the image uses `ignoreContextChanges`, the hash of
//!   the build context after `.dockerignore` rules
//! - Hashes of the image config and of the `entrypoint`/`cmd` overrides
//! - The active and the last recorded kube context
//!
//! Hashing walks the whole context directory, so it runs on the blocking pool. The new
//! hashes are written into the cache entry whatever the decision is; the cache is only
//! persisted by the caller after a successful run.
//!
//! # Entrypoint overrides
//!
//! When `entrypoint` or `cmd` is configured, docker and buildkit build from a
//! temporary copy of the Dockerfile with `ENTRYPOINT`/`CMD` lines appended
//! ([`BuildHelper::override_dockerfile`]); kaniko uploads the same content.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::BuildContext;
use crate::build::hash::{self, IgnoreRules};
use crate::build::rebuild::{RebuildInputs, decide};
use crate::config::{ImageConfig, RebuildStrategy};

/// Per-image data and logic shared by all backends.
///
/// Paths in the image config are relative to `project_dir`.
#[derive(Debug, Clone)]
pub struct BuildHelper {
    /// Key of the image in the project's `images:` map.
    pub config_name: String,
    pub image: ImageConfig,
    pub project_dir: PathBuf,
    /// Tags to build, the first is the primary tag.
    pub tags: Vec<String>,
}

impl BuildHelper {
    pub fn new(config_name: impl Into<String>, image: ImageConfig, project_dir: &Path, tags: Vec<String>) -> Self {
        Self {
            config_name: config_name.into(),
            image,
            project_dir: project_dir.to_path_buf(),
            tags,
        }
    }

    /// Repository name without a tag, e.g. `registry.example.com/api`.
    pub fn image_name(&self) -> &str {
        &self.image.image
    }

    /// First tag, recorded in the cache and the built-images registry. `latest`
    /// when no tags were resolved.
    pub fn primary_tag(&self) -> &str {
        self.tags.first().map_or("latest", String::as_str)
    }

    /// `image:tag` for every tag.
    pub fn image_refs(&self) -> Vec<String> {
        self.tags.iter().map(|tag| format!("{}:{tag}", self.image.image)).collect()
    }

    /// Absolute Dockerfile path (default `Dockerfile`).
    pub fn dockerfile_path(&self) -> PathBuf {
        self.project_dir.join(self.image.dockerfile_path())
    }

    /// Absolute build context directory (default: the project directory).
    pub fn context_path(&self) -> PathBuf {
        self.project_dir.join(self.image.context_path())
    }

    /// Ignore rules of the build context and the files that are always sent.
    ///
    /// The Dockerfile and the ignore file in use are kept even when a rule excludes
    /// them, as long as they live inside the context.
    pub fn context_rules(&self) -> Result<(IgnoreRules, Vec<String>)> {
        let context = self.context_path();
        let dockerfile = self.dockerfile_path();
        let (rules, ignore_file) = IgnoreRules::for_context(&context, &dockerfile)?;
        let keep = [Some(dockerfile), ignore_file]
            .into_iter()
            .flatten()
            .filter_map(|path| hash::relative_path(&context, &path))
            .collect();
        Ok((rules, keep))
    }

    /// Decide whether to rebuild, given what the backend knows about the local image.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Cache, kube context and local-context rules of this build
    /// * `force` - Rebuild regardless of hashes (`--force-rebuild`); the `always`
    ///   strategy forces as well
    /// * `image_available_locally` - `Some(false)` when the backend knows a
    ///   previously local-only image is gone; `None` when it cannot tell
    ///
    /// # Errors
    ///
    /// Fails when the Dockerfile or a context file cannot be read, or the image
    /// config cannot be serialized for hashing.
    pub async fn should_rebuild(
        &self,
        ctx: &BuildContext,
        force: bool,
        image_available_locally: Option<bool>,
    ) -> Result<bool> {
        let strategy = self.image.rebuild_strategy;
        let helper = self.clone();
        let (dockerfile_hash, context_hash) = tokio::task::spawn_blocking(move || -> Result<(String, Option<String>)> {
            let dockerfile_hash = hash::hash_file(&helper.dockerfile_path())?;
            if strategy == RebuildStrategy::IgnoreContextChanges {
                return Ok((dockerfile_hash, None));
            }
            let (rules, keep) = helper.context_rules()?;
            let context_hash = hash::hash_directory(&helper.context_path(), &rules, &keep)?;
            Ok((dockerfile_hash, Some(context_hash)))
        })
        .await
        .context("Hashing task failed")??;

        let inputs = RebuildInputs {
            dockerfile_hash,
            context_hash,
            image_config_hash: hash::image_config_hash(&self.image)?,
            entrypoint_hash: hash::entrypoint_hash(&self.image),
            force_rebuild: force || strategy == RebuildStrategy::Always,
            image_available_locally,
            current_context: ctx.kube.clone(),
            last_context: ctx.cache.last_context(),
        };

        let reason = ctx
            .cache
            .update_image(&self.config_name, |entry| decide(entry, &inputs, |name| ctx.local_contexts.is_local(name)));
        match reason {
            Some(reason) => {
                tracing::info!("Rebuild image {} because {reason}", self.image.image);
                Ok(true)
            }
            None => {
                tracing::debug!(target: "devflow::build", "Image {} is up to date", self.image.image);
                Ok(false)
            }
        }
    }

    /// Whether `entrypoint` or `cmd` overrides are configured.
    pub fn has_overrides(&self) -> bool {
        !self.image.entrypoint.is_empty() || !self.image.cmd.is_empty()
    }

    /// Dockerfile content with `ENTRYPOINT`/`CMD` overrides appended.
    ///
    /// Overrides use the JSON exec form, so arguments are never shell-split.
    pub fn dockerfile_content(&self) -> Result<String> {
        let path = self.dockerfile_path();
        let mut content =
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        if !content.ends_with('\n') {
            content.push('\n');
        }
        if !self.image.entrypoint.is_empty() {
            content.push_str(&format!("ENTRYPOINT {}\n", serde_json::to_string(&self.image.entrypoint)?));
        }
        if !self.image.cmd.is_empty() {
            content.push_str(&format!("CMD {}\n", serde_json::to_string(&self.image.cmd)?));
        }
        Ok(content)
    }

    /// A temporary Dockerfile with the overrides applied, if any are configured.
    ///
    /// The file is deleted when the returned handle is dropped; keep it alive until
    /// the build command has finished.
    pub fn override_dockerfile(&self) -> Result<Option<NamedTempFile>> {
        if !self.has_overrides() {
            return Ok(None);
        }
        let mut file = tempfile::Builder::new()
            .prefix("devflow-Dockerfile-")
            .tempfile()
            .context("Failed to create temporary Dockerfile")?;
        file.write_all(self.dockerfile_content()?.as_bytes())?;
        file.flush()?;
        Ok(Some(file))
    }

    /// `--build-arg` and `--target` flags shared by docker and buildx.
    pub fn build_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        for (key, value) in &self.image.build_args {
            flags.push("--build-arg".to_string());
            flags.push(format!("{key}={value}"));
        }
        if let Some(target) = &self.image.target {
            flags.push("--target".to_string());
            flags.push(target.clone());
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::cache::LocalCache;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn project(temp: &TempDir) -> BuildHelper {
        std::fs::write(temp.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        std::fs::write(temp.path().join("app.sh"), "echo hi\n").unwrap();
        let image = ImageConfig {
            image: "registry.example.com/app".to_string(),
            ..Default::default()
        };
        BuildHelper::new("app", image, temp.path(), vec!["v1".to_string(), "latest".to_string()])
    }

    #[test]
    fn test_paths_and_refs() {
        let temp = TempDir::new().unwrap();
        let helper = project(&temp);
        assert_eq!(helper.primary_tag(), "v1");
        assert_eq!(helper.image_refs(), vec!["registry.example.com/app:v1", "registry.example.com/app:latest"]);
        assert_eq!(helper.dockerfile_path(), temp.path().join("Dockerfile"));
        assert_eq!(helper.context_path(), temp.path().join("."));
    }

    #[tokio::test]
    async fn test_should_rebuild_settles_and_tracks_dockerfile() {
        let temp = TempDir::new().unwrap();
        let helper = project(&temp);
        let ctx = BuildContext::new(Arc::new(LocalCache::in_memory()));

        assert!(helper.should_rebuild(&ctx, false, None).await.unwrap());
        ctx.cache.update_image("app", |entry| entry.tag = "v1".to_string());
        assert!(!helper.should_rebuild(&ctx, false, None).await.unwrap());

        std::fs::write(temp.path().join("Dockerfile"), "FROM alpine:3\n").unwrap();
        assert!(helper.should_rebuild(&ctx, false, None).await.unwrap());
        assert_eq!(ctx.cache.image("app").dockerfile_hash, hash::hash_string("FROM alpine:3\n"));
        assert!(!helper.should_rebuild(&ctx, false, None).await.unwrap());

        std::fs::write(temp.path().join("app.sh"), "echo bye\n").unwrap();
        assert!(helper.should_rebuild(&ctx, false, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_ignore_context_changes_strategy() {
        let temp = TempDir::new().unwrap();
        let mut helper = project(&temp);
        helper.image.rebuild_strategy = RebuildStrategy::IgnoreContextChanges;
        let ctx = BuildContext::new(Arc::new(LocalCache::in_memory()));

        helper.should_rebuild(&ctx, false, None).await.unwrap();
        ctx.cache.update_image("app", |entry| entry.tag = "v1".to_string());

        std::fs::write(temp.path().join("app.sh"), "echo bye\n").unwrap();
        assert!(!helper.should_rebuild(&ctx, false, None).await.unwrap());
    }

    #[test]
    fn test_dockerfile_overrides() {
        let temp = TempDir::new().unwrap();
        let mut helper = project(&temp);
        assert!(helper.override_dockerfile().unwrap().is_none());

        helper.image.entrypoint = vec!["/bin/app".to_string()];
        helper.image.cmd = vec!["--port".to_string(), "80".to_string()];
        let content = helper.dockerfile_content().unwrap();
        assert_eq!(content, "FROM alpine\nENTRYPOINT [\"/bin/app\"]\nCMD [\"--port\",\"80\"]\n");

        let file = helper.override_dockerfile().unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), content);
    }
}
