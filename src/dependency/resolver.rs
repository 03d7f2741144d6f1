//! Dependency resolution.
//!
//! The [`Resolver`] walks the `dependencies:` of the root project depth-first. Every
//! descriptor is reduced to its canonical ID first:
//!
//! - an ID already in the graph only gets a new edge from the current parent, so a
//!   sub-project reached from several places is fetched and loaded once
//! - an edge that would close a cycle fails the resolution, or is skipped with a
//!   warning when cycles are allowed
//! - a new ID is materialized on disk, its config is loaded, it becomes a node
//!   under the current parent and its own dependencies are resolved below it
//!
//! The result is the graph plus a tree of [`ResolvedDependency`] values in which
//! shared sub-projects are the same `Arc`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ResolvedDependency;
use super::id::{dependency_id, project_id};
use super::source::SourceFetcher;
use crate::config::{ConfigLoader, DependencyConfig, LoadOptions, ProjectConfig};
use crate::graph::{Graph, GraphError};

/// Graph payload for a resolved dependency. The root node carries `None`.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub name: String,
    pub local_path: PathBuf,
    pub is_root: bool,
    pub config: Arc<ProjectConfig>,
    pub descriptor: DependencyConfig,
}

/// Output of [`Resolver::resolve`].
pub struct Resolution {
    pub graph: Graph<Option<ResolvedNode>>,
    /// Direct dependencies of the root project in declaration order.
    pub dependencies: Vec<Arc<ResolvedDependency>>,
}

impl Resolution {
    /// Consume the graph leaves first, returning each dependency with its ID.
    pub fn into_leaf_order(mut self) -> Vec<(String, ResolvedNode)> {
        self.graph.drain_leaves().into_iter().filter_map(|(id, node)| node.map(|node| (id, node))).collect()
    }
}

/// Builds the dependency graph of a project.
pub struct Resolver {
    loader: Arc<dyn ConfigLoader>,
    fetcher: SourceFetcher,
    allow_cyclic: bool,
    fetch_count: usize,
}

impl Resolver {
    pub fn new(loader: Arc<dyn ConfigLoader>, fetcher: SourceFetcher) -> Self {
        Self {
            loader,
            fetcher,
            allow_cyclic: false,
            fetch_count: 0,
        }
    }

    /// Skip cyclic edges with a warning instead of failing.
    #[must_use]
    pub fn allow_cyclic(mut self, allow: bool) -> Self {
        self.allow_cyclic = allow;
        self
    }

    /// How many sub-projects were fetched and loaded so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    /// Resolve all dependencies of the project at `base_path`.
    pub async fn resolve(&mut self, base_path: &Path, config: &ProjectConfig) -> Result<Resolution> {
        let root_id = project_id(base_path).await;
        let mut graph = Graph::new(root_id.clone(), None);

        self.resolve_recursive(&mut graph, base_path, &root_id, &config.dependencies).await?;

        let mut memo = HashMap::new();
        let dependencies =
            graph.children(&root_id).into_iter().filter_map(|id| build_tree(&graph, id, &mut memo)).collect();

        tracing::debug!("Resolved {} dependencies ({} fetched)", graph.len() - 1, self.fetch_count);
        Ok(Resolution {
            graph,
            dependencies,
        })
    }

    async fn resolve_recursive(
        &mut self,
        graph: &mut Graph<Option<ResolvedNode>>,
        base_path: &Path,
        parent_id: &str,
        dependencies: &[DependencyConfig],
    ) -> Result<()> {
        for dependency in dependencies {
            let id = dependency_id(base_path, dependency)
                .await
                .with_context(|| format!("Failed to resolve dependency '{}'", dependency.name))?;

            if graph.contains(&id) {
                match graph.add_edge(parent_id, &id) {
                    Ok(()) => {}
                    Err(GraphError::Cyclic(cyclic)) if self.allow_cyclic => {
                        tracing::warn!("Skipping dependency '{}': {cyclic}", dependency.name);
                    }
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context(format!("Failed to add dependency '{}'", dependency.name)));
                    }
                }
                continue;
            }

            let local_path = self.fetcher.materialize(base_path, dependency, &id).await?;
            let options = LoadOptions {
                profile: dependency.profile.clone(),
                vars: dependency.vars.clone(),
                config_name: dependency.source.config_name.clone(),
            };
            let mut config = self
                .loader
                .load(&local_path, &options)
                .with_context(|| format!("Failed to load config of dependency '{}'", dependency.name))?;
            self.fetch_count += 1;

            if dependency.skip_build {
                config.images.clear();
            }
            let config = Arc::new(config);

            let is_root = parent_id == graph.root_id();
            graph.insert_node_at(
                parent_id,
                id.clone(),
                Some(ResolvedNode {
                    name: dependency.name.clone(),
                    local_path: local_path.clone(),
                    is_root,
                    config: config.clone(),
                    descriptor: dependency.clone(),
                }),
            )?;
            tracing::debug!("Resolved dependency '{}' ({id})", dependency.name);

            if !dependency.ignore_dependencies && !config.dependencies.is_empty() {
                Box::pin(self.resolve_recursive(graph, &local_path, &id, &config.dependencies)).await?;
            }
        }
        Ok(())
    }
}

fn build_tree(
    graph: &Graph<Option<ResolvedNode>>,
    id: &str,
    memo: &mut HashMap<String, Arc<ResolvedDependency>>,
) -> Option<Arc<ResolvedDependency>> {
    if let Some(done) = memo.get(id) {
        return Some(done.clone());
    }
    let node = graph.get(id)?.as_ref()?;
    let children = graph.children(id).into_iter().filter_map(|child| build_tree(graph, child, memo)).collect();

    let resolved = Arc::new(ResolvedDependency {
        id: id.to_string(),
        name: node.name.clone(),
        local_path: node.local_path.clone(),
        is_root: node.is_root,
        config: node.config.clone(),
        descriptor: node.descriptor.clone(),
        children,
    });
    memo.insert(id.to_string(), resolved.clone());
    Some(resolved)
}
