//! Persisted image build cache.
//!
//! Every project keeps `.devflow/cache.yaml` with one entry per image config plus the
//! kube context the images were last built for:
//!
//! ```yaml
//! images:
//!   web:
//!     dockerfileHash: 3f2a...
//!     contextHash: 9b41...
//!     imageConfigHash: c0de...
//!     imageName: registry.example.com/web
//!     tag: a1b2c3d
//! lastContext:
//!   context: minikube
//!   namespace: default
//! ```
//!
//! Entries are updated concurrently by parallel builds, so the in-memory form locks
//! per entry. The file is written once by the caller after a successful run.

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::constants::{CACHE_FILE, STATE_DIR};
use crate::kube::KubeTarget;
use crate::utils::fs::atomic_write;

/// What the last successful build of one image config recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildCacheEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dockerfile_hash: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_hash: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_config_hash: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entrypoint_hash: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,

    /// Name under which the image was pushed to a cluster-local registry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_registry_image_name: Option<String>,

    /// The last build was not pushed and only exists in the local daemon.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub local_only: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    #[serde(default)]
    images: BTreeMap<String, ImageBuildCacheEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_context: Option<KubeTarget>,
}

/// In-memory view of a project's build cache.
#[derive(Debug, Default)]
pub struct LocalCache {
    images: DashMap<String, ImageBuildCacheEntry>,
    last_context: RwLock<Option<KubeTarget>>,
    path: Option<PathBuf>,
}

impl LocalCache {
    /// Cache location for a project directory.
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR).join(CACHE_FILE)
    }

    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache at `path`. A missing file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = if path.exists() {
            let content =
                std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml::from_str::<CacheFile>(&content)
                .with_context(|| format!("Failed to parse build cache {}", path.display()))?
        } else {
            CacheFile::default()
        };

        tracing::debug!(target: "devflow::build", "Loaded {} cache entries from {}", file.images.len(), path.display());
        Ok(Self {
            images: file.images.into_iter().collect(),
            last_context: RwLock::new(file.last_context),
            path: Some(path),
        })
    }

    /// Copy of the entry for an image config, default when absent.
    pub fn image(&self, name: &str) -> ImageBuildCacheEntry {
        self.images.get(name).map(|entry| entry.clone()).unwrap_or_default()
    }

    /// Mutate the entry for an image config under its lock, creating it if needed.
    pub fn update_image<R>(&self, name: &str, f: impl FnOnce(&mut ImageBuildCacheEntry) -> R) -> R {
        let mut entry = self.images.entry(name.to_string()).or_default();
        f(entry.value_mut())
    }

    pub fn last_context(&self) -> Option<KubeTarget> {
        self.last_context.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_last_context(&self, target: Option<KubeTarget>) {
        *self.last_context.write().unwrap_or_else(PoisonError::into_inner) = target;
    }

    /// Write the cache back to the file it was loaded from. No-op for in-memory caches.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = CacheFile {
            images: self.images.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect(),
            last_context: self.last_context(),
        };
        let yaml = serde_yaml::to_string(&file).context("Failed to serialize build cache")?;
        atomic_write(path, yaml.as_bytes()).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(target: "devflow::build", "Saved build cache to {}", path.display());
        Ok(())
    }
}
