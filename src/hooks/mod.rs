//! Lifecycle hooks.
//!
//! Builds and dependency walks fire named events around their work:
//!
//! | Event | When |
//! |---|---|
//! | `before:build`, `after:build`, `error:build` | around all image builds of a project |
//! | `before:build:<image>`, `after:build:<image>`, `error:build:<image>` | around one image |
//! | `before:<action>Dependencies`, `after:...`, `error:...` | around a dependency walk or tier |
//! | `before:<action>Dependency:<name>`, `after:...`, `error:...` | around one dependency |
//!
//! A failing hook aborts the operation that fired it.
//!
//! Projects attach shell commands to events in `devflow.yaml`:
//!
//! ```yaml
//! hooks:
//!   - events: ["before:build:web"]
//!     command: npm run build
//!   - events: ["error:build:*"]
//!     command: ./notify.sh
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{HookConfig, ProjectConfig};
use crate::core::DevflowError;
use crate::utils::command::ToolCommand;
use crate::utils::output::OutputSink;

/// Key/value data passed to hooks, serialized as JSON for command hooks.
pub type HookPayload = BTreeMap<String, serde_json::Value>;

/// Environment variable holding the event name for command hooks.
pub const HOOK_EVENT_ENV: &str = "DEVFLOW_HOOK_EVENT";

/// Environment variable holding the JSON payload for command hooks.
pub const HOOK_PAYLOAD_ENV: &str = "DEVFLOW_HOOK_PAYLOAD";

/// Runs whatever is attached to an event.
#[async_trait]
pub trait HookExecutor: Send + Sync {
    async fn execute(&self, event: &str, payload: &HookPayload) -> Result<()>;
}

/// Hook executor that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl HookExecutor for NoopHooks {
    async fn execute(&self, _event: &str, _payload: &HookPayload) -> Result<()> {
        Ok(())
    }
}

/// Runs the shell commands a project attached to events.
#[derive(Debug, Clone)]
pub struct CommandHooks {
    hooks: Vec<HookConfig>,
    working_dir: PathBuf,
    output: OutputSink,
}

impl CommandHooks {
    pub fn new(hooks: Vec<HookConfig>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            hooks,
            working_dir: working_dir.as_ref().to_path_buf(),
            output: OutputSink::log(),
        }
    }

    /// Hooks of `config`, run from the project directory.
    pub fn from_config(config: &ProjectConfig, project_dir: &Path) -> Self {
        Self::new(config.hooks.clone(), project_dir)
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    fn matching<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a HookConfig> + 'a {
        self.hooks.iter().filter(move |hook| hook.events.iter().any(|pattern| event_matches(pattern, event)))
    }
}

/// Exact match, or a pattern ending in `*` matching any event with that prefix.
fn event_matches(pattern: &str, event: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => event.starts_with(prefix),
        None => pattern == event,
    }
}

#[async_trait]
impl HookExecutor for CommandHooks {
    async fn execute(&self, event: &str, payload: &HookPayload) -> Result<()> {
        let hooks: Vec<&HookConfig> = self.matching(event).collect();
        if hooks.is_empty() {
            return Ok(());
        }

        let payload_json = serde_json::to_string(payload)?;
        for hook in hooks {
            tracing::info!("Execute hook '{}' for event {}", hook.command, event);
            ToolCommand::shell(&hook.command)
                .current_dir(&self.working_dir)
                .env(HOOK_EVENT_ENV, event)
                .env(HOOK_PAYLOAD_ENV, &payload_json)
                .with_context(event)
                .execute_streaming(&self.output)
                .await
                .map_err(|e| DevflowError::HookFailed {
                    event: event.to_string(),
                    command: hook.command.clone(),
                    reason: format!("{e:#}"),
                })?;
        }
        Ok(())
    }
}

/// Payload with a single `error` entry, used for `error:*` events.
pub fn error_payload(error: &anyhow::Error) -> HookPayload {
    HookPayload::from([("error".to_string(), serde_json::Value::String(format!("{error:#}")))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hook(events: &[&str], command: &str) -> HookConfig {
        HookConfig {
            events: events.iter().map(ToString::to_string).collect(),
            command: command.to_string(),
        }
    }

    #[test]
    fn test_event_matching() {
        assert!(event_matches("before:build", "before:build"));
        assert!(!event_matches("before:build", "before:build:web"));
        assert!(event_matches("before:build:*", "before:build:web"));
        assert!(event_matches("*", "after:deployDependencies"));
    }

    #[tokio::test]
    async fn test_command_hook_receives_event_and_payload() {
        let temp = TempDir::new().unwrap();
        let hooks = CommandHooks::new(
            vec![
                hook(&["after:build:web"], "printf '%s|%s' \"$DEVFLOW_HOOK_EVENT\" \"$DEVFLOW_HOOK_PAYLOAD\" > hook.out"),
                hook(&["before:build"], "touch should-not-run"),
            ],
            temp.path(),
        )
        .with_output(OutputSink::discard());

        let payload = HookPayload::from([("tag".to_string(), serde_json::json!("abc1234"))]);
        hooks.execute("after:build:web", &payload).await.unwrap();

        let written = std::fs::read_to_string(temp.path().join("hook.out")).unwrap();
        assert_eq!(written, r#"after:build:web|{"tag":"abc1234"}"#);
        assert!(!temp.path().join("should-not-run").exists());
    }

    #[tokio::test]
    async fn test_failing_hook_aborts() {
        let temp = TempDir::new().unwrap();
        let hooks = CommandHooks::new(vec![hook(&["before:build"], "exit 2")], temp.path())
            .with_output(OutputSink::discard());

        let err = hooks.execute("before:build", &HookPayload::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DevflowError>(),
            Some(DevflowError::HookFailed { event, .. }) if event == "before:build"
        ));
    }

    #[tokio::test]
    async fn test_noop_hooks() {
        NoopHooks.execute("before:build", &HookPayload::new()).await.unwrap();
    }
}
