//! Test fixtures for projects and resolved dependencies.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{DependencyConfig, DeploymentConfig, ImageConfig, ProjectConfig, SourceConfig};
use crate::constants::DEFAULT_CONFIG_FILE;
use crate::dependency::ResolvedDependency;

/// Writes sibling projects under one root directory.
///
/// Dependencies are declared as path sources pointing at `../<name>`.
pub struct ProjectFixture {
    root: PathBuf,
}

impl ProjectFixture {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn write(&self, name: &str, deps: &[&str], image: Option<&str>) -> Result<PathBuf> {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)?;

        let mut yaml = format!("name: {name}\n");
        if let Some(image) = image {
            std::fs::write(dir.join("Dockerfile"), format!("FROM alpine\nLABEL project={name}\n"))?;
            writeln!(yaml, "images:\n  {image}:\n    image: registry.example.com/{image}")?;
        }
        if !deps.is_empty() {
            yaml.push_str("dependencies:\n");
            for dep in deps {
                writeln!(yaml, "  - name: {dep}\n    source:\n      path: ../{dep}")?;
            }
        }
        std::fs::write(dir.join(DEFAULT_CONFIG_FILE), yaml)
            .with_context(|| format!("Failed to write config of {name}"))?;
        Ok(dir)
    }

    /// Project `name` depending on `deps`.
    pub fn project(&self, name: &str, deps: &[&str]) -> Result<PathBuf> {
        self.write(name, deps, None)
    }

    /// Project `name` depending on `deps` with one image `image_name` and a Dockerfile.
    pub fn project_with_image(&self, name: &str, deps: &[&str], image_name: &str) -> Result<PathBuf> {
        self.write(name, deps, Some(image_name))
    }
}

fn image(name: &str) -> ImageConfig {
    ImageConfig {
        image: format!("registry.example.com/{name}"),
        dockerfile: Some(format!("{name}.Dockerfile")),
        ..Default::default()
    }
}

/// Write `<image>.Dockerfile` for every image into `dir` and return a config
/// declaring them, in order.
pub fn write_image_project(dir: &Path, images: &[&str]) -> Result<ProjectConfig> {
    std::fs::create_dir_all(dir)?;
    let mut config = ProjectConfig {
        name: dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        ..Default::default()
    };
    for name in images {
        std::fs::write(dir.join(format!("{name}.Dockerfile")), format!("FROM alpine\nCMD [\"{name}\"]\n"))?;
        config.images.insert(*name, image(name));
    }
    Ok(config)
}

/// A resolved dependency without a project on disk.
pub fn resolved(name: &str, id: &str, is_root: bool, children: Vec<Arc<ResolvedDependency>>) -> Arc<ResolvedDependency> {
    Arc::new(ResolvedDependency {
        id: id.to_string(),
        name: name.to_string(),
        local_path: PathBuf::from(format!("/nonexistent/{name}")),
        is_root,
        config: Arc::new(ProjectConfig {
            name: name.to_string(),
            ..Default::default()
        }),
        descriptor: DependencyConfig {
            name: name.to_string(),
            source: SourceConfig {
                path: Some(format!("../{name}")),
                ..Default::default()
            },
            ..Default::default()
        },
        children,
    })
}

/// A resolved root-level dependency backed by a project in `dir` with the given
/// images and, unless empty, one deployment running `deploy_command`.
pub fn resolved_project(
    dir: &Path,
    name: &str,
    images: &[&str],
    deploy_command: &str,
) -> Result<Arc<ResolvedDependency>> {
    let mut config = write_image_project(dir, images)?;
    if !deploy_command.is_empty() {
        config.deployments.push(DeploymentConfig {
            name: format!("{name}-deploy"),
            command: deploy_command.to_string(),
        });
    }
    let base = resolved(name, &dir.display().to_string(), true, Vec::new());
    let descriptor = base.descriptor.clone();
    Ok(Arc::new(ResolvedDependency {
        id: base.id.clone(),
        name: name.to_string(),
        local_path: dir.to_path_buf(),
        is_root: true,
        config: Arc::new(config),
        descriptor,
        children: Vec::new(),
    }))
}
