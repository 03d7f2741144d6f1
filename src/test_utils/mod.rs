//! Test utilities for devflow
//!
//! Helpers for building fixture projects and git repositories, plus in-process
//! fakes for hooks and image builders so orchestration can be tested without a
//! container engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use devflow_cli::test_utils::ProjectFixture;
//!
//! let temp = tempfile::TempDir::new().unwrap();
//! let fixture = ProjectFixture::new(temp.path());
//! fixture.project("db", &[]).unwrap();
//! let root = fixture.project("app", &["db"]).unwrap();
//! assert!(root.join("devflow.yaml").exists());
//! ```

pub mod fakes;
pub mod fixtures;
pub mod git_helper;

pub use fakes::{FakeFactory, RecordingHooks};
pub use fixtures::{ProjectFixture, resolved, resolved_project, write_image_project};
pub use git_helper::TestGit;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. With `level` unset, logging is enabled only
/// when `RUST_LOG` is set:
///
/// ```bash
/// RUST_LOG=devflow=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
