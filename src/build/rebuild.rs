//! Rebuild decisions.
//!
//! [`decide`] compares freshly computed hashes against the cache entry of the last
//! successful build and reports the first reason to rebuild, if any. It has no side
//! effects besides recording the new hashes in the entry, so that a successful build
//! only has to persist the entry.

use std::fmt;

use super::cache::ImageBuildCacheEntry;
use crate::kube::KubeTarget;

/// Everything a rebuild decision looks at besides the cache entry.
#[derive(Debug, Clone, Default)]
pub struct RebuildInputs {
    pub dockerfile_hash: String,
    /// `None` when context hashing is disabled for the image.
    pub context_hash: Option<String>,
    pub image_config_hash: String,
    pub entrypoint_hash: String,
    pub force_rebuild: bool,
    /// Whether the backend found the previously built image locally. `None` when the
    /// backend cannot tell.
    pub image_available_locally: Option<bool>,
    pub current_context: Option<KubeTarget>,
    pub last_context: Option<KubeTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    MissingTag,
    DockerfileChanged,
    ImageConfigChanged,
    EntrypointChanged,
    ContextChanged,
    ImageMissingLocally,
    LeftLocalCluster,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Forced => "rebuild forced",
            Self::MissingTag => "no previous build",
            Self::DockerfileChanged => "Dockerfile changed",
            Self::ImageConfigChanged => "image config changed",
            Self::EntrypointChanged => "entrypoint or cmd changed",
            Self::ContextChanged => "build context changed",
            Self::ImageMissingLocally => "local-only image is missing",
            Self::LeftLocalCluster => "previous build targeted a different local cluster",
        };
        f.write_str(text)
    }
}

/// Decide whether an image must be rebuilt and record the new hashes in `entry`.
///
/// `is_local_context` classifies kube context names as local clusters.
pub fn decide(
    entry: &mut ImageBuildCacheEntry,
    inputs: &RebuildInputs,
    is_local_context: impl Fn(&str) -> bool,
) -> Option<RebuildReason> {
    let left_local_cluster = match (&inputs.last_context, &inputs.current_context) {
        (Some(last), current) => {
            is_local_context(&last.context) && current.as_ref().map(|c| c.context.as_str()) != Some(&last.context)
        }
        (None, _) => false,
    };

    let reason = if inputs.force_rebuild {
        Some(RebuildReason::Forced)
    } else if entry.tag.is_empty() {
        Some(RebuildReason::MissingTag)
    } else if entry.dockerfile_hash != inputs.dockerfile_hash {
        Some(RebuildReason::DockerfileChanged)
    } else if entry.image_config_hash != inputs.image_config_hash {
        Some(RebuildReason::ImageConfigChanged)
    } else if entry.entrypoint_hash != inputs.entrypoint_hash {
        Some(RebuildReason::EntrypointChanged)
    } else if inputs.context_hash.as_ref().is_some_and(|hash| *hash != entry.context_hash) {
        Some(RebuildReason::ContextChanged)
    } else if entry.local_only && inputs.image_available_locally == Some(false) {
        Some(RebuildReason::ImageMissingLocally)
    } else if left_local_cluster {
        Some(RebuildReason::LeftLocalCluster)
    } else {
        None
    };

    entry.dockerfile_hash.clone_from(&inputs.dockerfile_hash);
    entry.image_config_hash.clone_from(&inputs.image_config_hash);
    entry.entrypoint_hash.clone_from(&inputs.entrypoint_hash);
    if let Some(hash) = &inputs.context_hash {
        entry.context_hash.clone_from(hash);
    }

    reason
}
