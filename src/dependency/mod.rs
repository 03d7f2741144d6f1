//! Sub-project dependencies.
//!
//! A project lists other projects it depends on in the `dependencies:` section of its
//! `devflow.yaml`. This module turns those descriptors into a resolved tree and runs
//! actions (build, deploy) across it:
//!
//! - [`id`] - canonical dependency IDs used for deduplication
//! - [`source`] - cloning/updating git sources and locating path sources
//! - [`resolver`] - building the dependency graph
//! - [`manager`] - children-first execution of a [`manager::DependencyAction`]
//! - [`actions`] - the build and deploy actions

pub mod actions;
pub mod id;
pub mod manager;
pub mod resolver;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{DependencyConfig, ProjectConfig};

pub use actions::{BuildDependencies, DeployDependencies, ResolveDependencies};
pub use manager::{DependencyAction, DependencyManager, ExecuteOptions, ExecutionContext};
pub use resolver::{Resolution, ResolvedNode, Resolver};
pub use source::SourceFetcher;

/// A dependency after resolution.
///
/// A sub-project reached from several parents is a single value shared through `Arc`.
#[derive(Debug)]
pub struct ResolvedDependency {
    /// Canonical ID, see [`id::dependency_id`].
    pub id: String,
    /// Name from the declaring descriptor.
    pub name: String,
    /// Project directory (including any sub path).
    pub local_path: PathBuf,
    /// Declared directly by the root project.
    pub is_root: bool,
    pub config: Arc<ProjectConfig>,
    pub descriptor: DependencyConfig,
    pub children: Vec<Arc<ResolvedDependency>>,
}
