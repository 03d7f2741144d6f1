//! Content hashing for rebuild decisions.
//!
//! All hashes are lowercase hex SHA-256 digests. The build context hash covers the
//! sorted relative paths and contents of every file docker would send, after the
//! context's ignore rules are applied.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ImageConfig;
use crate::constants::{IGNORE_FILE, STATE_DIR};

pub fn hash_string(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// SHA-256 of a file's content.
pub fn hash_file(path: &Path) -> Result<String> {
    let content = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Hash of the YAML serialization of an image config.
pub fn image_config_hash(image: &ImageConfig) -> Result<String> {
    let yaml = serde_yaml::to_string(image).context("Failed to serialize image config")?;
    Ok(hash_string(&yaml))
}

/// Hash of the entrypoint and cmd overrides, empty when neither is set.
pub fn entrypoint_hash(image: &ImageConfig) -> String {
    if image.entrypoint.is_empty() && image.cmd.is_empty() {
        return String::new();
    }
    hash_string(&format!("{}\u{1}{}", image.entrypoint.join("\0"), image.cmd.join("\0")))
}

#[derive(Debug, Clone)]
struct IgnoreRule {
    pattern: glob::Pattern,
    exception: bool,
}

/// Parsed `.dockerignore` style rules.
///
/// A path is excluded when the last rule matching it (or one of its parent
/// directories) is not a `!` exception.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl IgnoreRules {
    pub fn parse(content: &str) -> Self {
        let rules = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let (exception, raw) = match line.strip_prefix('!') {
                    Some(rest) => (true, rest.trim()),
                    None => (false, line),
                };
                let cleaned = raw.trim_start_matches("./").trim_matches('/');
                if cleaned.is_empty() {
                    return None;
                }
                match glob::Pattern::new(cleaned) {
                    Ok(pattern) => Some(IgnoreRule { pattern, exception }),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid ignore pattern '{line}': {e}");
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// Rules for a build context, read from the first ignore file that exists:
    /// `devflow.dockerignore`, `<dockerfile>.dockerignore`, `.dockerignore`.
    ///
    /// Also returns the ignore file that was used.
    pub fn for_context(context_dir: &Path, dockerfile: &Path) -> Result<(Self, Option<PathBuf>)> {
        let mut candidates = vec![context_dir.join(IGNORE_FILE)];
        if let Some(name) = dockerfile.file_name() {
            let mut ignore_name = name.to_os_string();
            ignore_name.push(".dockerignore");
            candidates.push(dockerfile.with_file_name(ignore_name));
        }
        candidates.push(context_dir.join(".dockerignore"));

        for candidate in candidates {
            if candidate.is_file() {
                let content = std::fs::read_to_string(&candidate)
                    .with_context(|| format!("Failed to read {}", candidate.display()))?;
                return Ok((Self::parse(&content), Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }

    fn has_exceptions(&self) -> bool {
        self.rules.iter().any(|rule| rule.exception)
    }

    /// Whether the `/`-separated relative path is excluded.
    pub fn is_excluded(&self, relative: &str) -> bool {
        let mut excluded = false;
        for rule in &self.rules {
            let matches = ancestors(relative).any(|candidate| rule.pattern.matches_with(candidate, MATCH_OPTIONS));
            if matches {
                excluded = !rule.exception;
            }
        }
        excluded
    }
}

/// `a`, `a/b`, `a/b/c` for `a/b/c`.
fn ancestors(relative: &str) -> impl Iterator<Item = &str> {
    relative
        .match_indices('/')
        .map(|(i, _)| &relative[..i])
        .chain(std::iter::once(relative))
}

/// `/`-separated path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    Some(parts.join("/"))
}

/// Files of a build context that survive the ignore rules, sorted by path.
///
/// Paths listed in `keep` (relative to `context_dir`) are included even when the
/// rules exclude them. The state directory is always skipped.
pub fn context_files(context_dir: &Path, rules: &IgnoreRules, keep: &[String]) -> Result<Vec<(String, PathBuf)>> {
    let prune_excluded = !rules.has_exceptions();
    let mut files = Vec::new();

    let walker = WalkDir::new(context_dir).sort_by_file_name().min_depth(1).into_iter().filter_entry(|entry| {
        let Some(relative) = relative_path(context_dir, entry.path()) else {
            return false;
        };
        if relative == STATE_DIR || relative.starts_with(&format!("{STATE_DIR}/")) {
            return false;
        }
        // Without exceptions nothing below an excluded directory can come back.
        !(prune_excluded && entry.file_type().is_dir() && rules.is_excluded(&relative))
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", context_dir.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Some(relative) = relative_path(context_dir, entry.path()) else {
            continue;
        };
        if rules.is_excluded(&relative) && !keep.contains(&relative) {
            continue;
        }
        files.push((relative, entry.into_path()));
    }
    Ok(files)
}

/// Hash of a build context directory, see [`context_files`].
pub fn hash_directory(context_dir: &Path, rules: &IgnoreRules, keep: &[String]) -> Result<String> {
    let files = context_files(context_dir, rules, keep)?;
    let mut hasher = Sha256::new();

    for (relative, path) in &files {
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        if path.is_symlink() {
            let target = std::fs::read_link(path).with_context(|| format!("Failed to read link {}", path.display()))?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            let content = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            hasher.update(&content);
        }
        hasher.update([0u8]);
    }

    tracing::trace!(target: "devflow::build", "Hashed {} files in {}", files.len(), context_dir.display());
    Ok(hex::encode(hasher.finalize()))
}
