//! Image build orchestration.
//!
//! [`BuildController`] builds the images of one project in two phases:
//!
//! 1. **Rebuild check**: every selected image asks its backend whether it has to be
//!    rebuilt. Any error here aborts before a single build starts.
//! 2. **Build**: the images that need it are built, either one after another in
//!    declaration order or concurrently with at most `max_concurrent_builds` builds in
//!    flight. The first failure aborts the remaining builds; images that already
//!    finished stay built.
//!
//! Successful builds update the project's [`cache::LocalCache`] and are recorded in a
//! [`registry::BuiltImages`] that the caller merges into its own.
//!
//! [`BuildRuntime`] wraps the controller for whole projects: it loads the project's
//! cache, wires up its hooks and saves the cache after a successful run.

pub mod builder;
pub mod cache;
pub mod hash;
pub mod rebuild;
pub mod registry;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::config::ProjectConfig;
use crate::constants::RANDOM_TAG_LENGTH;
use crate::core::DevflowError;
use crate::hooks::{CommandHooks, HookExecutor, HookPayload, error_payload};
use crate::interrupt::InterruptRegistry;
use crate::kube::{KubeTarget, LocalContexts};
use crate::utils::output::OutputSink;

pub use builder::{BuildContext, BuildHelper, BuildOutcome, BuilderFactory, DefaultBuilderFactory, ImageBuilder};
pub use cache::{ImageBuildCacheEntry, LocalCache};
pub use rebuild::{RebuildInputs, RebuildReason};
pub use registry::{BuiltImages, ImageRef};

/// Caller-facing build options.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Tags replacing the configured ones.
    pub tags: Vec<String>,
    /// Build only these image configs. Empty means all.
    pub images: Vec<String>,
    pub skip_push: bool,
    pub force_rebuild: bool,
    pub sequential: bool,
    /// Upper bound for concurrent builds. `0` means unbounded.
    pub max_concurrent_builds: usize,
}

fn random_chars(count: usize) -> String {
    let mut chars = String::with_capacity(count);
    while chars.len() < count {
        let id = uuid::Uuid::new_v4().simple().to_string();
        chars.extend(id.chars().take(count - chars.len()));
    }
    chars
}

/// Tags for an image: overrides, else configured tags, else one random tag. Every
/// `#` is replaced with a random character.
pub fn resolve_tags(overrides: &[String], configured: &[String]) -> Vec<String> {
    let source = if overrides.is_empty() { configured } else { overrides };
    if source.is_empty() {
        return vec![random_chars(RANDOM_TAG_LENGTH)];
    }
    source
        .iter()
        .map(|tag| tag.chars().map(|c| if c == '#' { random_chars(1) } else { c.to_string() }).collect())
        .collect()
}

/// A finished image build.
#[derive(Debug)]
struct BuiltImage {
    config_name: String,
    image: ImageRef,
    local_only: bool,
}

fn image_payload(helper: &BuildHelper) -> HookPayload {
    HookPayload::from([
        ("image".to_string(), serde_json::Value::String(helper.config_name.clone())),
        ("imageName".to_string(), serde_json::Value::String(helper.image_name().to_string())),
        ("tags".to_string(), serde_json::json!(helper.tags)),
    ])
}

/// Build one image, firing its hooks. Owns everything so it can run as a task.
async fn build_image(
    builder: Box<dyn ImageBuilder>,
    ctx: BuildContext,
    hooks: Arc<dyn HookExecutor>,
) -> Result<BuiltImage> {
    let helper = builder.helper();
    let name = helper.config_name.clone();
    let payload = image_payload(helper);

    hooks.execute(&format!("before:build:{name}"), &payload).await?;
    tracing::info!("Building image {}:{} with {}", helper.image_name(), helper.primary_tag(), builder.engine());

    match builder.build(&ctx).await {
        Ok(outcome) => {
            hooks.execute(&format!("after:build:{name}"), &payload).await?;
            tracing::info!("Done building image {}:{}", helper.image_name(), helper.primary_tag());
            Ok(BuiltImage {
                config_name: name,
                image: ImageRef {
                    image_name: helper.image_name().to_string(),
                    tag: helper.primary_tag().to_string(),
                },
                local_only: outcome.local_only,
            })
        }
        Err(e) => {
            let error: anyhow::Error = DevflowError::ImageBuildFailed {
                image: helper.image_name().to_string(),
                tag: helper.primary_tag().to_string(),
                reason: format!("{e:#}"),
            }
            .into();
            let mut error_event = payload;
            error_event.extend(error_payload(&error));
            if let Err(hook_error) = hooks.execute(&format!("error:build:{name}"), &error_event).await {
                tracing::warn!("{hook_error:#}");
            }
            Err(error)
        }
    }
}

/// Builds the images of one project.
pub struct BuildController {
    project_dir: PathBuf,
    config: Arc<ProjectConfig>,
    factory: Arc<dyn BuilderFactory>,
    hooks: Arc<dyn HookExecutor>,
    ctx: BuildContext,
}

impl BuildController {
    pub fn new(
        project_dir: &Path,
        config: Arc<ProjectConfig>,
        factory: Arc<dyn BuilderFactory>,
        hooks: Arc<dyn HookExecutor>,
        ctx: BuildContext,
    ) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            config,
            factory,
            hooks,
            ctx,
        }
    }

    /// Build the selected images and merge them into `registry`.
    ///
    /// Returns the images built by this call.
    pub async fn build(&self, options: &BuildOptions, registry: &mut BuiltImages) -> Result<BuiltImages> {
        let selected: Vec<_> = self
            .config
            .images
            .iter()
            .filter(|(name, image)| !image.disabled && (options.images.is_empty() || options.images.contains(name)))
            .collect();
        if selected.is_empty() {
            tracing::debug!(target: "devflow::build", "No images to build in {}", self.project_dir.display());
            return Ok(BuiltImages::new());
        }

        let payload = HookPayload::from([(
            "images".to_string(),
            serde_json::json!(selected.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>()),
        )]);
        self.hooks.execute("before:build", &payload).await?;

        let mut builders = Vec::with_capacity(selected.len());
        for (name, image) in selected {
            let tags = resolve_tags(&options.tags, &image.tags);
            let helper = BuildHelper::new(name.clone(), image.clone(), &self.project_dir, tags);
            builders.push(self.factory.create(helper).await?);
        }

        match self.run(builders, options).await {
            Ok(built) => {
                self.hooks.execute("after:build", &payload).await?;
                self.ctx.cache.set_last_context(self.ctx.kube.clone());
                registry.merge(&built);
                Ok(built)
            }
            Err(e) => {
                if let Err(hook_error) = self.hooks.execute("error:build", &error_payload(&e)).await {
                    tracing::warn!("{hook_error:#}");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, builders: Vec<Box<dyn ImageBuilder>>, options: &BuildOptions) -> Result<BuiltImages> {
        let mut pending = Vec::with_capacity(builders.len());
        for builder in builders {
            let name = builder.helper().config_name.clone();
            let rebuild = builder
                .should_rebuild(&self.ctx, options.force_rebuild)
                .await
                .map_err(|e| DevflowError::RebuildCheckFailed {
                    image: name.clone(),
                    reason: format!("{e:#}"),
                })?;
            if rebuild {
                pending.push(builder);
            } else {
                tracing::info!("Skip building image {name}: no changes detected");
            }
        }

        let mut built = BuiltImages::new();
        if options.sequential || pending.len() < 2 {
            for builder in pending {
                let image = build_image(builder, self.ctx.clone(), self.hooks.clone()).await?;
                self.record(image, &mut built);
            }
            return Ok(built);
        }

        let max = options.max_concurrent_builds;
        let mut tasks = JoinSet::new();
        for builder in pending {
            if max > 0 && tasks.len() >= max {
                if let Some(joined) = tasks.join_next().await {
                    self.record(joined.context("Image build task failed")??, &mut built);
                }
            }
            let ctx = self.ctx.with_output(self.ctx.output.prefixed(&builder.helper().config_name));
            tasks.spawn(build_image(builder, ctx, self.hooks.clone()));
        }
        // Returning early drops the set, which aborts the builds still running.
        while let Some(joined) = tasks.join_next().await {
            self.record(joined.context("Image build task failed")??, &mut built);
        }
        Ok(built)
    }

    fn record(&self, image: BuiltImage, built: &mut BuiltImages) {
        self.ctx.cache.update_image(&image.config_name, |entry| {
            if entry.image_name == image.image.image_name && entry.tag == image.image.tag {
                tracing::warn!(
                    "Image {} was rebuilt with the same tag {}, the previous image is overwritten",
                    image.image.image_name,
                    image.image.tag
                );
            }
            entry.image_name.clone_from(&image.image.image_name);
            entry.tag.clone_from(&image.image.tag);
            entry.local_only = image.local_only;
        });
        built.insert(image.config_name, image.image);
    }
}

/// Everything needed to build whole projects during one run.
#[derive(Clone)]
pub struct BuildRuntime {
    pub factory: Arc<dyn BuilderFactory>,
    pub kube: Option<KubeTarget>,
    pub local_contexts: LocalContexts,
    pub interrupts: InterruptRegistry,
}

impl BuildRuntime {
    /// Build the images of the project in `project_dir` with the project's own hooks
    /// and cache. The cache is saved when the build succeeds.
    pub async fn build_project(
        &self,
        project_dir: &Path,
        config: Arc<ProjectConfig>,
        options: &BuildOptions,
        output: OutputSink,
        registry: &mut BuiltImages,
    ) -> Result<BuiltImages> {
        if config.images.is_empty() {
            return Ok(BuiltImages::new());
        }

        let cache = Arc::new(LocalCache::load(LocalCache::path_for(project_dir))?);
        let hooks = Arc::new(CommandHooks::from_config(&config, project_dir).with_output(output.clone()));
        let ctx = BuildContext {
            cache: cache.clone(),
            kube: self.kube.clone(),
            local_contexts: self.local_contexts.clone(),
            interrupts: self.interrupts.clone(),
            output,
            skip_push: options.skip_push,
        };

        let controller = BuildController::new(project_dir, config, self.factory.clone(), hooks, ctx);
        let built = controller.build(options, registry).await?;
        cache.save()?;
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageConfig;
    use crate::test_utils::{FakeFactory, RecordingHooks, write_image_project};
    use tempfile::TempDir;

    fn controller(
        temp: &TempDir,
        images: &[&str],
        factory: Arc<FakeFactory>,
        hooks: Arc<RecordingHooks>,
    ) -> BuildController {
        let config = write_image_project(temp.path(), images).unwrap();
        let ctx = BuildContext::new(Arc::new(LocalCache::in_memory())).with_output(OutputSink::discard());
        BuildController::new(temp.path(), Arc::new(config), factory, hooks, ctx)
    }

    #[test]
    fn test_resolve_tags() {
        let configured = vec!["v1".to_string(), "build-###".to_string()];
        let tags = resolve_tags(&[], &configured);
        assert_eq!(tags[0], "v1");
        assert!(tags[1].starts_with("build-"));
        assert_eq!(tags[1].len(), 9);
        assert!(!tags[1].contains('#'));

        let overridden = resolve_tags(&["custom".to_string()], &configured);
        assert_eq!(overridden, vec!["custom"]);

        let random = resolve_tags(&[], &[]);
        assert_eq!(random.len(), 1);
        assert_eq!(random[0].len(), RANDOM_TAG_LENGTH);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_registers_all_images() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(FakeFactory::default());
        let controller = controller(&temp, &["api", "web"], factory.clone(), Arc::new(RecordingHooks::default()));

        let options = BuildOptions {
            max_concurrent_builds: 1,
            tags: vec!["t1".to_string()],
            ..Default::default()
        };
        let mut registry = BuiltImages::new();
        let built = controller.build(&options, &mut registry).await.unwrap();

        assert_eq!(built.len(), 2);
        assert_eq!(registry.get("api").unwrap().tag, "t1");
        assert_eq!(registry.get("web").unwrap().tag, "t1");
        assert_eq!(factory.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_builds_overlap() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(FakeFactory::default());
        let controller =
            controller(&temp, &["a", "b", "c"], factory.clone(), Arc::new(RecordingHooks::default()));

        let mut registry = BuiltImages::new();
        controller.build(&BuildOptions::default(), &mut registry).await.unwrap();

        assert_eq!(registry.len(), 3);
        assert!(factory.max_in_flight() > 1);
    }

    #[tokio::test]
    async fn test_unchanged_images_are_skipped() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(FakeFactory::default());
        let controller = controller(&temp, &["web"], factory.clone(), Arc::new(RecordingHooks::default()));

        let mut registry = BuiltImages::new();
        controller.build(&BuildOptions::default(), &mut registry).await.unwrap();
        let second = controller.build(&BuildOptions::default(), &mut registry).await.unwrap();

        assert!(second.is_empty());
        assert_eq!(factory.builds(), vec!["web"]);

        let forced = BuildOptions {
            force_rebuild: true,
            ..Default::default()
        };
        controller.build(&forced, &mut registry).await.unwrap();
        assert_eq!(factory.builds().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_wrapped_and_hooked() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(FakeFactory::failing(&["web"]));
        let hooks = Arc::new(RecordingHooks::default());
        let controller = controller(&temp, &["web"], factory, hooks.clone());

        let options = BuildOptions {
            tags: vec!["t9".to_string()],
            ..Default::default()
        };
        let mut registry = BuiltImages::new();
        let err = controller.build(&options, &mut registry).await.unwrap_err();

        match err.downcast_ref::<DevflowError>() {
            Some(DevflowError::ImageBuildFailed { image, tag, .. }) => {
                assert_eq!(image, "registry.example.com/web");
                assert_eq!(tag, "t9");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.is_empty());
        assert_eq!(hooks.events(), vec!["before:build", "before:build:web", "error:build:web", "error:build"]);
    }

    #[tokio::test]
    async fn test_failing_error_hooks_keep_build_error() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(FakeFactory::failing(&["web"]));
        let hooks = Arc::new(RecordingHooks::failing(&["error:build:web", "error:build"]));
        let controller = controller(&temp, &["web"], factory, hooks.clone());

        let err = controller.build(&BuildOptions::default(), &mut BuiltImages::new()).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DevflowError>(),
            Some(DevflowError::ImageBuildFailed { image, .. }) if image == "registry.example.com/web"
        ));
        assert_eq!(hooks.events(), vec!["before:build", "before:build:web", "error:build:web", "error:build"]);
    }

    #[tokio::test]
    async fn test_rebuild_check_failure_aborts_before_building() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(FakeFactory::default());
        let controller = controller(&temp, &["api", "web"], factory.clone(), Arc::new(RecordingHooks::default()));
        std::fs::remove_file(temp.path().join("web.Dockerfile")).unwrap();

        let err = controller.build(&BuildOptions::default(), &mut BuiltImages::new()).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DevflowError>(),
            Some(DevflowError::RebuildCheckFailed { image, .. }) if image == "web"
        ));
        assert!(factory.builds().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_and_unselected_images() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(FakeFactory::default());
        let mut config = write_image_project(temp.path(), &["api", "web", "docs"]).unwrap();
        let mut docs: ImageConfig = config.images.get("docs").cloned().unwrap();
        docs.disabled = true;
        config.images.insert("docs", docs);
        let ctx = BuildContext::new(Arc::new(LocalCache::in_memory())).with_output(OutputSink::discard());
        let controller = BuildController::new(
            temp.path(),
            Arc::new(config),
            factory.clone(),
            Arc::new(RecordingHooks::default()),
            ctx,
        );

        let options = BuildOptions {
            images: vec!["web".to_string(), "docs".to_string()],
            ..Default::default()
        };
        controller.build(&options, &mut BuiltImages::new()).await.unwrap();
        assert_eq!(factory.builds(), vec!["web"]);
    }
}
