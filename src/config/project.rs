//! Project configuration types (`devflow.yaml`).
//!
//! These are the already-parsed, already-migrated shapes the rest of the crate works
//! with. Loading, variable substitution and profiles live in [`super::loader`].

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use crate::core::DevflowError;

/// A string-keyed map that keeps the order entries were declared in.
///
/// Images are built in declaration order in sequential mode, so the order of the YAML
/// mapping is significant.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace, keeping the original position of a replaced key.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap::new())
            }
        }

        deserializer.deserialize_any(OrderedMapVisitor(PhantomData))
    }
}

/// Root of a `devflow.yaml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,

    /// Default values for `${VAR}` references.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub images: OrderedMap<ImageConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<DeploymentConfig>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl ProjectConfig {
    /// Overlay the named profile onto this config.
    ///
    /// Images are merged by name; dependencies and deployments are replaced when the
    /// profile declares them.
    pub fn apply_profile(&mut self, profile: &str, file: &str) -> Result<(), DevflowError> {
        let overlay = self.profiles.get(profile).cloned().ok_or_else(|| DevflowError::ProfileNotFound {
            profile: profile.to_string(),
            file: file.to_string(),
        })?;

        if let Some(images) = overlay.images {
            for (name, image) in images.0 {
                self.images.insert(name, image);
            }
        }
        if let Some(dependencies) = overlay.dependencies {
            self.dependencies = dependencies;
        }
        if let Some(deployments) = overlay.deployments {
            self.deployments = deployments;
        }
        Ok(())
    }
}

/// One image the project builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Repository name without tag, e.g. `registry.example.com/team/web`.
    pub image: String,

    /// Tags to apply. `#` characters are replaced by random characters at build time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "RebuildStrategy::is_default")]
    pub rebuild_strategy: RebuildStrategy,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_push: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "BuildConfig::is_empty")]
    pub build: BuildConfig,
}

impl ImageConfig {
    pub fn dockerfile_path(&self) -> &str {
        self.dockerfile.as_deref().unwrap_or("Dockerfile")
    }

    pub fn context_path(&self) -> &str {
        self.context.as_deref().unwrap_or(".")
    }
}

/// When to rebuild an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RebuildStrategy {
    /// Rebuild when any tracked input changed.
    #[default]
    Default,
    /// Rebuild on every run.
    Always,
    /// Track everything except the build context contents.
    IgnoreContextChanges,
}

impl RebuildStrategy {
    fn is_default(&self) -> bool {
        *self == Self::Default
    }
}

/// Builder backend selection and backend-specific options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildkit: Option<BuildKitConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kaniko: Option<KanikoConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomBuildConfig>,
}

impl BuildConfig {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Declared backend: custom, then buildkit, then kaniko, else docker.
    pub fn kind(&self) -> BuilderKind {
        if self.custom.is_some() {
            BuilderKind::Custom
        } else if self.buildkit.is_some() {
            BuilderKind::BuildKit
        } else if self.kaniko.is_some() {
            BuilderKind::Kaniko
        } else {
            BuilderKind::Docker
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderKind {
    Docker,
    BuildKit,
    Kaniko,
    Custom,
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Docker => "docker",
            Self::BuildKit => "buildkit",
            Self::Kaniko => "kaniko",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    /// Do not push when the active kube context is a local cluster.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_push_local_cluster: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildKitConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanikoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Executor image, defaults to `gcr.io/kaniko-project/executor:latest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomBuildConfig {
    pub command: String,
}

/// A sub-project dependency declared by a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyConfig {
    pub name: String,

    pub source: SourceConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Variable overrides applied when loading the dependency's config.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Do not resolve the dependency's own dependencies.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_dependencies: bool,

    /// Do not build the dependency's images.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_build: bool,
}

/// Where a dependency comes from: exactly one of `git` or `path`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Config file name inside the dependency, defaults to `devflow.yaml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
}

/// Validated view of a [`SourceConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind<'a> {
    Git(&'a str),
    Path(&'a str),
}

impl SourceConfig {
    pub fn kind(&self, dependency: &str) -> Result<SourceKind<'_>, DevflowError> {
        let git = self.git.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let path = self.path.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match (git, path) {
            (Some(url), None) => Ok(SourceKind::Git(url)),
            (None, Some(path)) => Ok(SourceKind::Path(path)),
            (Some(_), Some(_)) => Err(DevflowError::InvalidDependencySource {
                name: dependency.to_string(),
                reason: "both 'git' and 'path' are set".to_string(),
            }),
            (None, None) => Err(DevflowError::InvalidDependencySource {
                name: dependency.to_string(),
                reason: "one of 'git' or 'path' is required".to_string(),
            }),
        }
    }

    /// First non-empty of tag, branch, revision.
    pub fn git_ref(&self) -> Option<&str> {
        [&self.tag, &self.branch, &self.revision]
            .into_iter()
            .filter_map(|r| r.as_deref())
            .find(|r| !r.is_empty())
    }

    /// Tags and revisions are fixed refs that are never pulled again.
    pub fn is_pinned(&self) -> bool {
        self.tag.as_deref().is_some_and(|t| !t.is_empty())
            || self.revision.as_deref().is_some_and(|r| !r.is_empty())
    }

    pub fn sub_path(&self) -> Option<&str> {
        self.sub_path.as_deref().map(|s| s.trim_matches('/')).filter(|s| !s.is_empty())
    }
}

/// A command run on lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    /// Event names such as `before:build` or `after:deployDependencies`.
    pub events: Vec<String>,
    pub command: String,
}

/// A deployment step run by `devflow deploy`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub name: String,
    pub command: String,
}

/// Partial config overlaid by [`ProjectConfig::apply_profile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<OrderedMap<ImageConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<DependencyConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<Vec<DeploymentConfig>>,
}
