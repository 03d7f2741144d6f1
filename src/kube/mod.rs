//! Kubernetes cluster context helpers.
//!
//! The build orchestrator records which kube context images were last built for. A
//! context whose images live in the cluster's own docker daemon (minikube,
//! docker-desktop, kind, ...) is a "local" context; leaving it means images built
//! for it without pushing are not available anywhere else.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::constants::KUBECTL_QUERY_TIMEOUT;
use crate::utils::command::ToolCommand;

static LOCAL_CONTEXT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(minikube|docker-desktop|docker-for-desktop|rancher-desktop|orbstack|colima|kind-.+|k3d-.+)$")
        .expect("valid local context pattern")
});

/// The cluster a run targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeTarget {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Classifies kube context names as local clusters.
#[derive(Debug, Clone, Default)]
pub struct LocalContexts {
    extra: Vec<String>,
}

impl LocalContexts {
    /// Built-in local cluster names plus `extra` exact names from the global settings.
    pub fn new(extra: Vec<String>) -> Self {
        Self { extra }
    }

    pub fn is_local(&self, context: &str) -> bool {
        LOCAL_CONTEXT_PATTERN.is_match(context) || self.extra.iter().any(|c| c == context)
    }
}

/// The active kube context and its default namespace, if kubectl is configured.
///
/// Failures (no kubectl, no kubeconfig) are reported as `None`.
pub async fn current_target() -> Option<KubeTarget> {
    let context = ToolCommand::kubectl()
        .args(["config", "current-context"])
        .with_timeout(Some(KUBECTL_QUERY_TIMEOUT))
        .execute_stdout()
        .await
        .ok()
        .filter(|c| !c.is_empty())?;

    let namespace = ToolCommand::kubectl()
        .args(["config", "view", "--minify", "--output", "jsonpath={..namespace}"])
        .with_timeout(Some(KUBECTL_QUERY_TIMEOUT))
        .execute_stdout()
        .await
        .ok()
        .filter(|ns| !ns.is_empty());

    tracing::debug!("Active kube context: {context} (namespace {:?})", namespace);
    Some(KubeTarget { context, namespace })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_local_contexts() {
        let contexts = LocalContexts::default();
        for name in ["minikube", "docker-desktop", "kind-dev", "k3d-test"] {
            assert!(contexts.is_local(name), "{name} should be local");
        }
        for name in ["gke_project_zone_cluster", "kind-", "prod"] {
            assert!(!contexts.is_local(name), "{name} should not be local");
        }
    }

    #[test]
    fn test_extra_local_contexts() {
        let contexts = LocalContexts::new(vec!["my-laptop".to_string()]);
        assert!(contexts.is_local("my-laptop"));
        assert!(!contexts.is_local("my-laptop-2"));
    }
}
