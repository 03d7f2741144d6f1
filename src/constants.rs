//! Global constants used throughout the devflow codebase.
//!
//! Timeouts, file names and other values shared by multiple modules.

use std::time::Duration;

/// Name of the project configuration file looked up in a project directory.
pub const DEFAULT_CONFIG_FILE: &str = "devflow.yaml";

/// Name of the per-project state directory.
///
/// It holds the image build cache and is always excluded from build context hashing.
pub const STATE_DIR: &str = ".devflow";

/// File name of the persisted image build cache inside [`STATE_DIR`].
pub const CACHE_FILE: &str = "cache.yaml";

/// Tool-specific ignore file consulted before `<Dockerfile>.dockerignore` and `.dockerignore`.
pub const IGNORE_FILE: &str = "devflow.dockerignore";

/// Length of generated image tags when none is configured.
pub const RANDOM_TAG_LENGTH: usize = 7;

/// Default timeout for git operations (5 minutes).
pub const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for probing whether a local docker daemon is reachable (10 seconds).
pub const DOCKER_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for short kubectl queries such as reading the current context (15 seconds).
pub const KUBECTL_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Hard limit for an in-cluster build pod to become ready (20 minutes).
pub const BUILD_POD_READY_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Interval between build pod readiness polls (1 second).
pub const BUILD_POD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Exit status used after running interrupt cleanups.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;
