//! Error handling for devflow
//!
//! Errors are modelled in two layers:
//! 1. [`DevflowError`] - strongly-typed failures that code can match on
//! 2. [`ErrorContext`] - a wrapper adding a suggestion and details for CLI users
//!
//! Library functions return [`anyhow::Result`] and attach context while errors bubble
//! up. The binary converts the final error with [`user_friendly_error`], which looks
//! for a [`DevflowError`] (or a [`GraphError`]) anywhere in the chain and picks a
//! suggestion for it.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::graph::GraphError;

/// Main error type for devflow operations.
///
/// The enum is `Clone` so it can be carried inside an [`ErrorContext`]; variants that
/// wrap a lower-level failure keep its rendered message in a `reason` field.
#[derive(Error, Debug, Clone)]
pub enum DevflowError {
    /// Git executable could not be started.
    #[error("Git is not installed or not found in PATH")]
    GitNotFound,

    /// A git command exited with a non-zero status.
    ///
    /// # Fields
    /// - `operation`: The git subcommand that failed (e.g. "fetch", "pull")
    /// - `stderr`: The error output from git
    #[error("Git operation failed: {operation}")]
    GitCommandError { operation: String, stderr: String },

    /// Git repository clone failed
    #[error("Failed to clone repository: {url}")]
    GitCloneFailed { url: String, reason: String },

    /// Git checkout failed
    #[error("Failed to checkout reference '{reference}' in repository")]
    GitCheckoutFailed { reference: String, reason: String },

    /// A non-git external command (docker, kubectl, sh) failed.
    #[error("{program} {operation} failed")]
    CommandFailed {
        program: String,
        operation: String,
        stderr: String,
    },

    /// An external command did not finish in time.
    #[error("{program} {operation} timed out after {seconds} seconds")]
    CommandTimeout {
        program: String,
        operation: String,
        seconds: u64,
    },

    /// No project configuration file at the expected location.
    #[error("Project configuration not found: {path}")]
    ConfigNotFound { path: String },

    /// Project configuration could not be parsed.
    #[error("Invalid project configuration in {file}: {reason}")]
    ConfigParseError { file: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// A dependency or the command line requested a profile the config does not define.
    #[error("Profile '{profile}' is not defined in {file}")]
    ProfileNotFound { profile: String, file: String },

    /// A `${VAR}` reference had no override, default or environment value.
    #[error("Variable '{name}' used in {file} has no value")]
    UnresolvedVariable { name: String, file: String },

    /// A path dependency points at a location that does not exist.
    #[error("Dependency '{name}' points to missing path {path}")]
    DependencySourceNotFound { name: String, path: String },

    /// A dependency descriptor declares neither or both of `git` and `path`.
    #[error("Invalid source for dependency '{name}': {reason}")]
    InvalidDependencySource { name: String, reason: String },

    /// The per-dependency action failed.
    ///
    /// `name` is the dot-qualified path of the dependency from the root project and
    /// `output` is everything the action wrote before failing.
    #[error("{action} dependency {name} failed: {reason}{}", format_output(.output))]
    DependencyActionFailed {
        action: String,
        name: String,
        output: String,
        reason: String,
    },

    /// Deciding whether an image needs a rebuild failed. No build was started.
    #[error("Error during image rebuild check for '{image}': {reason}")]
    RebuildCheckFailed { image: String, reason: String },

    /// A single image build failed.
    #[error("Error building image {image}:{tag}: {reason}")]
    ImageBuildFailed {
        image: String,
        tag: String,
        reason: String,
    },

    /// The local docker daemon is unreachable and builder fallback is disabled.
    #[error("Docker daemon is not reachable and builder fallback is disabled")]
    DockerUnavailable,

    /// An in-cluster build pod did not become ready in time.
    #[error("Build pod {pod} was not ready after {seconds} seconds")]
    BuildPodTimeout { pod: String, seconds: u64 },

    /// A lifecycle hook exited with an error.
    #[error("Hook '{command}' for event {event} failed: {reason}")]
    HookFailed {
        event: String,
        command: String,
        reason: String,
    },

    /// A deployment command failed.
    #[error("Deployment '{name}' failed: {reason}")]
    DeploymentFailed { name: String, reason: String },

    /// Other error
    #[error("{message}")]
    Other { message: String },
}

fn format_output(output: &str) -> String {
    let trimmed = output.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n\n{trimmed}")
    }
}

/// Error wrapper with a suggestion and details for display in the terminal.
#[derive(Debug)]
pub struct ErrorContext {
    pub error: DevflowError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub const fn new(error: DevflowError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colored labels.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
///
/// The whole chain is searched, so a [`DevflowError`] wrapped by `anyhow` context
/// still gets its specific suggestion. Context messages added above the typed error
/// are kept as details.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    for cause in error.chain() {
        if let Some(devflow_error) = cause.downcast_ref::<DevflowError>() {
            let ctx = create_error_context(devflow_error);
            return attach_outer_context(ctx, &error, cause);
        }

        if let Some(GraphError::Cyclic(cyclic)) = cause.downcast_ref::<GraphError>() {
            let ctx = ErrorContext::new(DevflowError::Other {
                message: cyclic.to_string(),
            })
            .with_suggestion(
                "Remove one of the dependencies on the cycle or pass --allow-cyclic to skip cyclic edges",
            );
            return attach_outer_context(ctx, &error, cause);
        }

        if let Some(io_error) = cause.downcast_ref::<std::io::Error>() {
            match io_error.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    return ErrorContext::new(DevflowError::Other {
                        message: error.to_string(),
                    })
                    .with_suggestion("Check file ownership and permissions")
                    .with_details(io_error.to_string());
                }
                std::io::ErrorKind::NotFound => {
                    return ErrorContext::new(DevflowError::Other {
                        message: error.to_string(),
                    })
                    .with_suggestion("Check that the file or directory exists and the path is correct")
                    .with_details(io_error.to_string());
                }
                _ => {}
            }
        }
    }

    let details = error.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>();
    let ctx = ErrorContext::new(DevflowError::Other {
        message: error.to_string(),
    });
    if details.is_empty() {
        ctx
    } else {
        ctx.with_details(details.join(": "))
    }
}

fn attach_outer_context(
    ctx: ErrorContext,
    error: &anyhow::Error,
    typed: &(dyn std::error::Error + 'static),
) -> ErrorContext {
    let outer: Vec<String> = error
        .chain()
        .take_while(|cause| {
            !std::ptr::addr_eq(
                *cause as *const dyn std::error::Error,
                typed as *const dyn std::error::Error,
            )
        })
        .map(ToString::to_string)
        .collect();

    if outer.is_empty() || ctx.details.is_some() {
        ctx
    } else {
        ctx.with_details(outer.join(": "))
    }
}

fn create_error_context(error: &DevflowError) -> ErrorContext {
    match error {
        DevflowError::GitNotFound => ErrorContext::new(error.clone())
            .with_suggestion("Install git and make sure it is available in your PATH"),
        DevflowError::GitCommandError { stderr, .. } => {
            ErrorContext::new(error.clone()).with_details(stderr.trim().to_string())
        }
        DevflowError::GitCloneFailed { reason, .. } => ErrorContext::new(error.clone())
            .with_suggestion("Check the repository URL and that you have access to it")
            .with_details(reason.trim().to_string()),
        DevflowError::GitCheckoutFailed { reason, .. } => ErrorContext::new(error.clone())
            .with_suggestion("Check that the branch, tag or revision exists in the repository")
            .with_details(reason.trim().to_string()),
        DevflowError::CommandFailed { program, stderr, .. } => {
            let ctx = ErrorContext::new(error.clone()).with_details(stderr.trim().to_string());
            if program == "docker" {
                ctx.with_suggestion("Make sure the docker daemon is running and you are logged in to the registry")
            } else if program == "kubectl" {
                ctx.with_suggestion("Check your kube context with 'kubectl config current-context'")
            } else {
                ctx
            }
        }
        DevflowError::ConfigNotFound { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Run devflow from a project directory or pass --project <dir>"),
        DevflowError::ConfigParseError { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Check the YAML syntax and field names in the configuration file"),
        DevflowError::ProfileNotFound { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Define the profile under 'profiles:' or remove it from the dependency"),
        DevflowError::UnresolvedVariable { name, .. } => ErrorContext::new(error.clone())
            .with_suggestion(format!(
                "Set {name} in the 'vars:' section, in the dependency's vars or as an environment variable"
            )),
        DevflowError::DependencySourceNotFound { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Paths are resolved relative to the project that declares the dependency"),
        DevflowError::DependencyActionFailed { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Use --skip-dependency <name> to exclude the failing dependency"),
        DevflowError::RebuildCheckFailed { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Check that the Dockerfile and build context of the image exist"),
        DevflowError::DockerUnavailable => ErrorContext::new(error.clone())
            .with_suggestion("Start docker or enable builder fallback in ~/.devflow/config.toml"),
        DevflowError::BuildPodTimeout { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Inspect the pod with 'kubectl describe pod' to find out why it is pending"),
        _ => ErrorContext::new(error.clone()),
    }
}
