//! Git test helper utilities
//!
//! Provides a safe wrapper around git for building fixture repositories in tests.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Git command runner for a fixture repository.
///
/// Commits are made with a fixed identity and without signing, so tests do not
/// depend on the user's git configuration.
pub struct TestGit {
    repo_path: PathBuf,
}

impl TestGit {
    fn run_git_command(&self, args: &[&str], action: &str) -> Result<std::process::Output> {
        let output = Command::new("git")
            .args(["-c", "user.name=Test User", "-c", "user.email=test@devflow.example", "-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .with_context(|| action.to_string())?;

        if !output.status.success() {
            bail!("{} failed: {}", action, String::from_utf8_lossy(&output.stderr));
        }

        Ok(output)
    }

    /// Create `path` if needed and initialize a repository in it.
    pub fn init(path: impl Into<PathBuf>) -> Result<Self> {
        let repo = Self {
            repo_path: path.into(),
        };
        std::fs::create_dir_all(&repo.repo_path)?;
        repo.run_git_command(&["init", "--quiet"], "Failed to initialize git repository")?;
        Ok(repo)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Write `relative` and commit it.
    pub fn commit_file(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.repo_path.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        self.run_git_command(&["add", relative], "Failed to add file to git")?;
        self.run_git_command(&["commit", "--quiet", "-m", &format!("Update {relative}")], "Failed to create git commit")?;
        Ok(())
    }

    pub fn tag(&self, tag_name: &str) -> Result<()> {
        self.run_git_command(&["tag", tag_name], &format!("Failed to create tag: {tag_name}"))?;
        Ok(())
    }

    /// Current commit SHA.
    pub fn head(&self) -> Result<String> {
        let output = self.run_git_command(&["rev-parse", "HEAD"], "Failed to get current commit SHA")?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.run_git_command(&["remote", "add", name, url], &format!("Failed to add remote: {name}"))?;
        Ok(())
    }
}
