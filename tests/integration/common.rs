//! Shared helpers for the integration tests

use anyhow::Result;
use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary workspace holding sibling projects and an isolated global config.
pub struct TestWorkspace {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();
        fs::write(
            root.join("settings.toml"),
            format!("dependency_dir = \"{}\"\n", root.join("checkouts").display()),
        )?;
        Ok(Self {
            _temp_dir: temp_dir,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `<root>/<name>/devflow.yaml`.
    pub fn write_project(&self, name: &str, config: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("devflow.yaml"), config)?;
        Ok(dir)
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        Ok(fs::read_to_string(self.root.join(relative))?)
    }

    /// `devflow` invocation for the project `name`, isolated from the user's settings
    /// and kube config.
    pub fn devflow(&self, name: &str) -> Command {
        let mut cmd = Command::cargo_bin("devflow").expect("devflow binary is built");
        cmd.current_dir(self.root.join(name))
            .env("DEVFLOW_CONFIG_PATH", self.root.join("settings.toml"))
            .env("KUBECONFIG", self.root.join("missing-kubeconfig"))
            .env("NO_COLOR", "1")
            .env("DEVFLOW_NO_PROGRESS", "1")
            .env_remove("RUST_LOG");
        cmd
    }
}
