//! Running an action across the resolved dependency tree.
//!
//! The [`DependencyManager`] walks the tree recursively and runs a
//! [`DependencyAction`] on every dependency after all of its children, so leaves go
//! first and the root project's direct dependencies go last. A dependency reached
//! from several parents runs once; later visits only add it to the result again.
//!
//! Every dependency gets a private output buffer. When the action fails, the error
//! carries the dependency's dot-qualified name (`api.db`) and everything it printed.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::ResolvedDependency;
use super::actions::ResolveDependencies;
use super::resolver::{Resolution, Resolver};
use crate::config::ProjectConfig;
use crate::core::DevflowError;
use crate::hooks::{HookExecutor, HookPayload, error_payload};
use crate::utils::output::OutputSink;

/// Per-dependency environment handed to an action.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Dot-joined names from the root project, e.g. `api.db`.
    pub qualified_name: String,
    pub dependency_id: String,
    pub output: OutputSink,
}

/// Work done once per dependency.
#[async_trait]
pub trait DependencyAction: Send {
    /// Lower-case action name used in events and errors, e.g. `build`.
    fn name(&self) -> &str;

    async fn execute(&mut self, ctx: &ExecutionContext, dependency: &ResolvedDependency) -> Result<()>;
}

/// Name filters and output settings for a walk.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Run only dependencies with these names (plain or qualified). Empty means all.
    pub only: Vec<String>,
    /// Never run dependencies with these names (plain or qualified).
    pub skip: Vec<String>,
    /// Also stream each dependency's output to the log as it happens.
    pub verbose: bool,
}

impl ExecuteOptions {
    fn names(list: &[String], name: &str, qualified: &str) -> bool {
        list.iter().any(|entry| entry == name || entry == qualified)
    }

    fn skip_reason(&self, name: &str, qualified: &str) -> Option<&'static str> {
        if !self.only.is_empty() && !Self::names(&self.only, name, qualified) {
            return Some("not selected");
        }
        if Self::names(&self.skip, name, qualified) {
            return Some("skipped");
        }
        None
    }
}

/// Walks resolved dependencies children-first.
pub struct DependencyManager {
    hooks: Arc<dyn HookExecutor>,
    options: ExecuteOptions,
}

impl DependencyManager {
    pub fn new(hooks: Arc<dyn HookExecutor>, options: ExecuteOptions) -> Self {
        Self { hooks, options }
    }

    async fn fire(&self, event: String, payload: &HookPayload) -> Result<()> {
        self.hooks.execute(&event, payload).await
    }

    /// Resolve the dependencies of `config` and run `action` on all of them.
    ///
    /// Fires `before:`, `after:` or `error:<action>Dependencies` around the whole
    /// operation. Does nothing when `config` has no dependencies.
    pub async fn handle_dependencies<A: DependencyAction>(
        &self,
        resolver: &mut Resolver,
        base_path: &Path,
        config: &ProjectConfig,
        action: &mut A,
    ) -> Result<Vec<Arc<ResolvedDependency>>> {
        if config.dependencies.is_empty() {
            return Ok(Vec::new());
        }
        let (_, executed) = self.run_tier(resolver, base_path, config, action).await?;
        Ok(executed)
    }

    /// Resolve the dependencies of `config` without acting on them.
    ///
    /// The `resolve` events fire like those of any other action, so hooks can
    /// observe every dependency as it is reached.
    pub async fn resolve_dependencies(
        &self,
        resolver: &mut Resolver,
        base_path: &Path,
        config: &ProjectConfig,
    ) -> Result<Resolution> {
        if config.dependencies.is_empty() {
            return resolver.resolve(base_path, config).await;
        }
        let (resolution, _) = self.run_tier(resolver, base_path, config, &mut ResolveDependencies).await?;
        Ok(resolution)
    }

    async fn run_tier<A: DependencyAction>(
        &self,
        resolver: &mut Resolver,
        base_path: &Path,
        config: &ProjectConfig,
        action: &mut A,
    ) -> Result<(Resolution, Vec<Arc<ResolvedDependency>>)> {
        let action_name = action.name().to_string();
        let payload = HookPayload::new();
        self.fire(format!("before:{action_name}Dependencies"), &payload).await?;

        let result = match resolver.resolve(base_path, config).await {
            Ok(resolution) => self
                .execute_dependencies(&resolution.dependencies, action)
                .await
                .map(|executed| (resolution, executed)),
            Err(e) => Err(e),
        };

        match result {
            Ok(done) => {
                self.fire(format!("after:{action_name}Dependencies"), &payload).await?;
                Ok(done)
            }
            Err(e) => {
                self.fire(format!("error:{action_name}Dependencies"), &error_payload(&e)).await?;
                Err(e)
            }
        }
    }

    /// Run `action` on every dependency below `dependencies`, children first.
    ///
    /// Returns the top-level dependencies that ran, including repeats of shared ones.
    pub async fn execute_dependencies<A: DependencyAction>(
        &self,
        dependencies: &[Arc<ResolvedDependency>],
        action: &mut A,
    ) -> Result<Vec<Arc<ResolvedDependency>>> {
        let mut executed = HashSet::new();
        self.execute_recursive("", dependencies, action, &mut executed).await
    }

    async fn execute_recursive<A: DependencyAction>(
        &self,
        parent_name: &str,
        dependencies: &[Arc<ResolvedDependency>],
        action: &mut A,
        executed: &mut HashSet<String>,
    ) -> Result<Vec<Arc<ResolvedDependency>>> {
        let mut result = Vec::with_capacity(dependencies.len());
        let action_name = action.name().to_string();

        for dependency in dependencies {
            if executed.contains(&dependency.id) {
                result.push(dependency.clone());
                continue;
            }
            executed.insert(dependency.id.clone());

            let qualified_name = if parent_name.is_empty() {
                dependency.name.clone()
            } else {
                format!("{parent_name}.{}", dependency.name)
            };
            let payload = HookPayload::from([(
                "dependency".to_string(),
                serde_json::Value::String(qualified_name.clone()),
            )]);

            if !dependency.children.is_empty() {
                self.fire(format!("before:{action_name}Dependencies"), &payload).await?;
                let children =
                    Box::pin(self.execute_recursive(&qualified_name, &dependency.children, action, executed)).await;
                if let Err(e) = children {
                    self.fire(format!("error:{action_name}Dependencies"), &error_payload(&e)).await?;
                    return Err(e);
                }
                self.fire(format!("after:{action_name}Dependencies"), &payload).await?;
            }

            if let Some(reason) = self.options.skip_reason(&dependency.name, &qualified_name) {
                tracing::info!("Skip dependency {qualified_name} ({reason})");
                continue;
            }

            self.fire(format!("before:{action_name}Dependency:{qualified_name}"), &payload).await?;
            tracing::info!("Run {action_name} for dependency {qualified_name}");

            let (buffer_sink, buffer) = OutputSink::buffered();
            let output = if self.options.verbose {
                buffer_sink.tee(&OutputSink::log().prefixed(&qualified_name))
            } else {
                buffer_sink
            };
            let ctx = ExecutionContext {
                qualified_name: qualified_name.clone(),
                dependency_id: dependency.id.clone(),
                output,
            };

            if let Err(e) = action.execute(&ctx, dependency).await {
                let mut error_event = payload.clone();
                error_event.extend(error_payload(&e));
                self.fire(format!("error:{action_name}Dependency:{qualified_name}"), &error_event).await?;
                return Err(DevflowError::DependencyActionFailed {
                    action: action_name,
                    name: qualified_name,
                    output: buffer.contents(),
                    reason: format!("{e:#}"),
                }
                .into());
            }

            self.fire(format!("after:{action_name}Dependency:{qualified_name}"), &payload).await?;
            tracing::info!("Done {action_name} for dependency {qualified_name}");
            result.push(dependency.clone());
        }

        Ok(result)
    }
}
