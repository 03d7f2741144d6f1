//! Materializing dependency sources on disk.
//!
//! Git dependencies are cloned into `<dependency_dir>/<sha256(id)>`, one checkout per
//! canonical ID. On later runs the checkout is updated in place:
//!
//! - pinned revision: fetch and check out only if `HEAD` is not already there
//! - pinned tag: same, comparing against the tag's commit
//! - branch or default branch: `git pull` when updating is enabled
//!
//! Path dependencies are used where they are.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::id::resolve_local_path;
use crate::config::{DependencyConfig, SourceConfig, SourceKind};
use crate::core::DevflowError;
use crate::git::{GitRepo, strip_auth_from_url};
use crate::utils::fs::ensure_dir;

/// Fetches dependency sources into the dependency directory.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    dependency_dir: PathBuf,
    update: bool,
}

impl SourceFetcher {
    /// `update` controls whether unpinned git checkouts are pulled when they exist.
    pub fn new(dependency_dir: impl Into<PathBuf>, update: bool) -> Self {
        Self {
            dependency_dir: dependency_dir.into(),
            update,
        }
    }

    /// Checkout location for a git dependency ID.
    pub fn checkout_dir(&self, id: &str) -> PathBuf {
        self.dependency_dir.join(hex::encode(Sha256::digest(id.as_bytes())))
    }

    /// Make the dependency available locally and return its project directory.
    ///
    /// The returned path includes the descriptor's sub path.
    pub async fn materialize(&self, base_path: &Path, dependency: &DependencyConfig, id: &str) -> Result<PathBuf> {
        let source = &dependency.source;
        let root = match source.kind(&dependency.name)? {
            SourceKind::Git(url) => self.fetch_git(url, source, id).await.with_context(|| {
                format!("Failed to fetch dependency '{}' from {}", dependency.name, strip_auth_from_url(url))
            })?,
            SourceKind::Path(path) => resolve_local_path(base_path, &dependency.name, path)?,
        };

        let project_dir = match source.sub_path() {
            Some(sub_path) => root.join(sub_path),
            None => root,
        };
        if !project_dir.is_dir() {
            return Err(DevflowError::DependencySourceNotFound {
                name: dependency.name.clone(),
                path: project_dir.display().to_string(),
            }
            .into());
        }
        Ok(project_dir)
    }

    async fn fetch_git(&self, url: &str, source: &SourceConfig, id: &str) -> Result<PathBuf> {
        let target = self.checkout_dir(id);
        let tag = source.tag.as_deref().filter(|t| !t.is_empty());
        let branch = source.branch.as_deref().filter(|b| !b.is_empty());
        let revision = source.revision.as_deref().filter(|r| !r.is_empty());

        if !target.join(".git").exists() {
            if target.exists() {
                tracing::debug!(target: "git", "Removing incomplete checkout {}", target.display());
                tokio::fs::remove_dir_all(&target).await?;
            }
            ensure_dir(&self.dependency_dir)?;

            tracing::info!("Cloning {}", strip_auth_from_url(url));
            let repo = GitRepo::clone(url, &target, tag.or(branch)).await?;
            if let Some(revision) = revision {
                repo.checkout(revision).await?;
            }
            return Ok(target);
        }

        let repo = GitRepo::new(&target);
        if let Some(pinned) = revision.or(tag) {
            let head = repo.get_current_commit().await?;
            let at_pinned = match repo.resolve_ref(pinned).await {
                Ok(sha) => sha == head,
                Err(_) => false,
            };
            if !at_pinned {
                tracing::debug!(target: "git", "Checking out {pinned} in {}", target.display());
                repo.fetch().await?;
                repo.checkout(pinned).await?;
            }
        } else if self.update {
            tracing::debug!(target: "git", "Pulling {}", strip_auth_from_url(url));
            repo.pull().await?;
        }
        Ok(target)
    }
}
