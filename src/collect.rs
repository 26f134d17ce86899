//! Document collection.
//!
//! Walks the workspace once and matches every file against the layout
//! globs of the requested kinds. The output is ordered: kinds in the order
//! requested, paths sorted within a kind. A file matching several kinds is
//! assigned to the first requested kind that matches.
//!
//! Time-partitioned kinds (`log`, `session`) are additionally filtered by
//! the recency window. A file's date is taken from a `YYYY-MM-DD` filename
//! prefix (`2024-05-01-standup.md`), falling back to its modification time.
//!
//! `.git/`, `target/`, `node_modules/` and the index directory are never
//! descended into.

use chrono::{DateTime, NaiveDate, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::config::LayoutConfig;
use crate::error::{RecallError, Result};
use crate::models::{DocKind, Document};

const SKIP_DIRS: [&str; 3] = [".git", "target", "node_modules"];

/// Enumerate the documents of `kinds` under `root`.
pub fn collect_documents(
    root: &Path,
    kinds: &[DocKind],
    recent_days: u32,
    layout: &LayoutConfig,
    index_dir: &Path,
    today: NaiveDate,
) -> Result<Vec<Document>> {
    let mut requested: Vec<DocKind> = Vec::new();
    for kind in kinds {
        if !requested.contains(kind) {
            requested.push(*kind);
        }
    }

    let matchers = requested
        .iter()
        .map(|kind| -> Result<(DocKind, GlobSet)> {
            Ok((*kind, build_globset(layout.patterns(*kind))?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut files = walk_files(root, index_dir);
    files.sort();

    let mut per_kind: Vec<Vec<Document>> = vec![Vec::new(); requested.len()];
    for rel in files {
        let Some(slot) = matchers.iter().position(|(_, set)| set.is_match(&rel)) else {
            continue;
        };
        let kind = matchers[slot].0;
        let path = root.join(&rel);

        if kind.is_dated() {
            let Some(date) = document_date(&path) else {
                continue;
            };
            if !is_recent(date, today, recent_days) {
                continue;
            }
        }

        per_kind[slot].push(Document {
            kind,
            path,
            file: rel,
        });
    }

    Ok(per_kind.into_iter().flatten().collect())
}

/// Days since `date` must be below `recent_days`; future dates count as recent.
pub fn is_recent(date: NaiveDate, today: NaiveDate, recent_days: u32) -> bool {
    (today - date).num_days() < i64::from(recent_days)
}

/// Date of a time-partitioned document: filename prefix, else mtime.
pub fn document_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_string_lossy();
    if let Some(date) = name
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    {
        return Some(date);
    }
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).date_naive())
}

fn walk_files(root: &Path, index_dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e, index_dir));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(rel);
    }
    files
}

fn is_skipped_dir(entry: &DirEntry, index_dir: &Path) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    if entry.path() == index_dir {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    SKIP_DIRS.contains(&name.as_ref())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| RecallError::Config(format!("invalid layout glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RecallError::Config(format!("invalid layout globs: {}", e)))
}
