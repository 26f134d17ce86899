//! Version-control queries used for change detection.
//!
//! Only three questions are ever asked of git:
//!
//! | Query | Command |
//! |-------|---------|
//! | current revision | `git rev-parse HEAD` |
//! | dirty paths | `git diff --name-only --relative HEAD` + `git ls-files --others --exclude-standard` |
//! | changed between revisions | `git diff --name-only --relative <from> <to>` |
//!
//! All paths are `/`-separated and relative to the workspace root. Any
//! failure (git not installed, not a repository, unknown revision) surfaces
//! as [`RecallError::Git`]; callers fall back to filesystem stamps.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use crate::error::{RecallError, Result};

/// Current `HEAD` revision, or `None` when `root` is not inside a git
/// repository with at least one commit.
pub fn head(root: &Path) -> Option<String> {
    let sha = run_git(root, &["rev-parse", "HEAD"]).ok()?;
    let sha = sha.trim();
    if sha.is_empty() {
        None
    } else {
        Some(sha.to_string())
    }
}

/// Paths modified relative to `HEAD` plus untracked, non-ignored files.
pub fn dirty_paths(root: &Path) -> Result<BTreeSet<String>> {
    let mut paths = lines(&run_git(root, &["diff", "--name-only", "--relative", "HEAD"])?);
    paths.extend(lines(&run_git(
        root,
        &["ls-files", "--others", "--exclude-standard"],
    )?));
    Ok(paths)
}

/// Paths that differ between revisions `from` and `to`.
pub fn changed_paths(root: &Path, from: &str, to: &str) -> Result<BTreeSet<String>> {
    Ok(lines(&run_git(
        root,
        &["diff", "--name-only", "--relative", from, to],
    )?))
}

/// Everything needed to decide whole-file reuse against a previous build.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub dirty: BTreeSet<String>,
    pub changed: BTreeSet<String>,
}

impl ChangeSet {
    /// Dirty and changed paths between `prev_head` and `head`.
    pub fn between(root: &Path, prev_head: &str, head: &str) -> Result<Self> {
        Ok(Self {
            dirty: dirty_paths(root)?,
            changed: changed_paths(root, prev_head, head)?,
        })
    }

    pub fn touches(&self, file: &str) -> bool {
        self.dirty.contains(file) || self.changed.contains(file)
    }
}

fn run_git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| RecallError::Git(format!("failed to execute git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RecallError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn lines(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.replace('\\', "/"))
        .collect()
}
