//! Configuration for devflow.
//!
//! Two kinds of configuration exist:
//!
//! - **Project config** (`devflow.yaml`): images, dependencies, hooks, deployments and
//!   profiles of one project. See [`project`] for the types and [`loader`] for
//!   variable substitution and profile handling.
//! - **Global settings** (`~/.devflow/config.toml`): per-user defaults such as the
//!   dependency checkout directory and build concurrency. See [`global`].

pub mod global;
pub mod loader;
pub mod project;

pub use global::GlobalConfig;
pub use loader::{ConfigLoader, LoadOptions, YamlConfigLoader};
pub use project::{
    BuildConfig, BuildKitConfig, BuilderKind, CustomBuildConfig, DependencyConfig, DeploymentConfig,
    DockerConfig, HookConfig, ImageConfig, KanikoConfig, OrderedMap, ProfileConfig, ProjectConfig,
    RebuildStrategy, SourceConfig, SourceKind,
};
