//! Index freshness check.
//!
//! Answers "would a build right now change anything?" without embedding or
//! writing. The first reason found is reported.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::builder::mtime_ms;
use crate::collect::collect_documents;
use crate::config::Config;
use crate::error::{RecallError, Result};
use crate::git;
use crate::store;

/// Why an index is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    /// Provider, model, dimension, kinds, window or chunking changed.
    FingerprintMismatch,
    IndexMissing,
    MetaMissing,
    /// A document has no stamp in the index, or a stamped file is gone.
    FileMissing { file: String },
    /// A document has uncommitted changes.
    FileDirty { file: String },
    /// A document changed since the last build.
    FileChanged { file: String },
    /// A stamped chunk id has no item (e.g. dropped by the chunk cap).
    MissingChunkIds { file: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpToDate {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StaleReason>,
}

impl UpToDate {
    fn fresh() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn stale(reason: StaleReason) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

/// Check whether the persisted index for `root` matches `config` and the
/// current state of the workspace.
pub fn is_up_to_date(root: &Path, config: &Config) -> Result<UpToDate> {
    let index_dir = config.index_dir(root);
    let fingerprint = config.build.fingerprint()?;

    let index = match store::load_index(&index_dir) {
        Ok(index) => index,
        Err(RecallError::NotFound(_)) | Err(RecallError::Corrupt(_)) => {
            return Ok(UpToDate::stale(StaleReason::IndexMissing))
        }
        Err(e) => return Err(e),
    };
    let meta = match store::load_meta(&index_dir) {
        Ok(meta) => meta,
        Err(RecallError::NotFound(_)) | Err(RecallError::Corrupt(_)) => {
            return Ok(UpToDate::stale(StaleReason::MetaMissing))
        }
        Err(e) => return Err(e),
    };
    if meta.fingerprint() != fingerprint {
        return Ok(UpToDate::stale(StaleReason::FingerprintMismatch));
    }

    let head = git::head(root);
    let dirty: BTreeSet<String> = if head.is_some() {
        git::dirty_paths(root).unwrap_or_default()
    } else {
        BTreeSet::new()
    };
    let changed: BTreeSet<String> = match (&head, &meta.git_head) {
        (Some(head), Some(prev)) if head != prev => {
            git::changed_paths(root, prev, head).unwrap_or_default()
        }
        _ => BTreeSet::new(),
    };

    let item_ids: HashSet<&str> = index.items.iter().map(|i| i.chunk.id.as_str()).collect();
    let docs = collect_documents(
        root,
        &config.build.kinds,
        config.build.recent_days,
        &config.layout,
        &index_dir,
        Local::now().date_naive(),
    )?;

    let mut seen: HashSet<String> = HashSet::new();
    for doc in &docs {
        let key = doc.key();
        let Some(stamp) = index.files.get(&key) else {
            return Ok(UpToDate::stale(StaleReason::FileMissing {
                file: doc.file.clone(),
            }));
        };
        if dirty.contains(&doc.file) {
            return Ok(UpToDate::stale(StaleReason::FileDirty {
                file: doc.file.clone(),
            }));
        }
        let stat_differs = match std::fs::metadata(&doc.path) {
            Ok(m) => m.len() != stamp.size || mtime_ms(&m) != stamp.mtime_ms,
            Err(_) => {
                return Ok(UpToDate::stale(StaleReason::FileMissing {
                    file: doc.file.clone(),
                }))
            }
        };
        if changed.contains(&doc.file) || stat_differs {
            return Ok(UpToDate::stale(StaleReason::FileChanged {
                file: doc.file.clone(),
            }));
        }
        if stamp.chunk_ids.iter().any(|id| !item_ids.contains(id.as_str())) {
            return Ok(UpToDate::stale(StaleReason::MissingChunkIds {
                file: doc.file.clone(),
            }));
        }
        seen.insert(key);
    }

    if let Some(stamp) = index.files.iter().find(|(key, _)| !seen.contains(*key)).map(|(_, s)| s) {
        return Ok(UpToDate::stale(StaleReason::FileMissing {
            file: stamp.file.clone(),
        }));
    }

    Ok(UpToDate::fresh())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_index, BuildContext};
    use tempfile::TempDir;

    fn config() -> Config {
        let mut config = Config::default();
        config.build.dim = 16;
        config
    }

    fn workspace() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("NOTES.md"), "remember the milk\nand the eggs\n").unwrap();
        std::fs::write(tmp.path().join("TASKS.md"), "- [ ] ship release\n").unwrap();
        tmp
    }

    #[test]
    fn missing_index_is_reported() {
        let tmp = workspace();
        let state = is_up_to_date(tmp.path(), &config()).unwrap();
        assert!(!state.ok);
        assert_eq!(state.reason, Some(StaleReason::IndexMissing));
    }

    #[tokio::test]
    async fn fresh_after_build_then_stale_after_edit() {
        let tmp = workspace();
        let config = config();
        build_index(tmp.path(), &config, &BuildContext::default()).await.unwrap();
        assert_eq!(is_up_to_date(tmp.path(), &config).unwrap(), UpToDate::fresh());

        std::fs::write(tmp.path().join("TASKS.md"), "- [x] ship release\n- [ ] announce it\n").unwrap();
        let state = is_up_to_date(tmp.path(), &config).unwrap();
        assert_eq!(
            state.reason,
            Some(StaleReason::FileChanged {
                file: "TASKS.md".into()
            })
        );
    }

    #[tokio::test]
    async fn new_and_deleted_files_are_reported() {
        let tmp = workspace();
        let config = config();
        build_index(tmp.path(), &config, &BuildContext::default()).await.unwrap();

        std::fs::write(tmp.path().join("TODO.md"), "new todo\n").unwrap();
        assert_eq!(
            is_up_to_date(tmp.path(), &config).unwrap().reason,
            Some(StaleReason::FileMissing { file: "TODO.md".into() })
        );

        std::fs::remove_file(tmp.path().join("TODO.md")).unwrap();
        std::fs::remove_file(tmp.path().join("NOTES.md")).unwrap();
        assert_eq!(
            is_up_to_date(tmp.path(), &config).unwrap().reason,
            Some(StaleReason::FileMissing { file: "NOTES.md".into() })
        );
    }

    #[tokio::test]
    async fn fingerprint_change_is_reported() {
        let tmp = workspace();
        let mut config = config();
        build_index(tmp.path(), &config, &BuildContext::default()).await.unwrap();
        config.build.dim = 24;
        assert_eq!(
            is_up_to_date(tmp.path(), &config).unwrap().reason,
            Some(StaleReason::FingerprintMismatch)
        );
    }

    #[tokio::test]
    async fn missing_meta_is_reported() {
        let tmp = workspace();
        let config = config();
        build_index(tmp.path(), &config, &BuildContext::default()).await.unwrap();
        std::fs::remove_file(store::meta_path(&config.index_dir(tmp.path()))).unwrap();
        assert_eq!(
            is_up_to_date(tmp.path(), &config).unwrap().reason,
            Some(StaleReason::MetaMissing)
        );
    }

    #[tokio::test]
    async fn capped_build_reports_missing_chunk_ids() {
        let tmp = workspace();
        let mut config = config();
        config.build.max_total_chunks = 1;
        let (meta, _) = build_index(tmp.path(), &config, &BuildContext::default()).await.unwrap();
        assert_eq!(meta.item_count, 1);

        let state = is_up_to_date(tmp.path(), &config).unwrap();
        assert!(!state.ok);
        assert!(
            matches!(state.reason, Some(StaleReason::MissingChunkIds { .. })),
            "{:?}",
            state.reason
        );
    }

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn dirty_tracked_file_is_reported() {
        let tmp = workspace();
        let root = tmp.path();
        if !git(root, &["init", "-q"]) {
            eprintln!("git not available, skipping");
            return;
        }
        assert!(git(root, &["config", "user.email", "test@example.com"]));
        assert!(git(root, &["config", "user.name", "Test"]));
        assert!(git(root, &["config", "commit.gpgsign", "false"]));
        std::fs::write(root.join(".gitignore"), ".recall/\n").unwrap();
        assert!(git(root, &["add", "."]));
        assert!(git(root, &["commit", "-q", "-m", "init"]));

        let config = config();
        build_index(root, &config, &BuildContext::default()).await.unwrap();
        assert_eq!(is_up_to_date(root, &config).unwrap(), UpToDate::fresh());

        std::fs::write(root.join("NOTES.md"), "remember the oat milk\n").unwrap();
        assert_eq!(
            is_up_to_date(root, &config).unwrap().reason,
            Some(StaleReason::FileDirty {
                file: "NOTES.md".into()
            })
        );
    }

    #[test]
    fn reason_serializes_snake_case() {
        let json = serde_json::to_value(StaleReason::FileDirty { file: "a.md".into() }).unwrap();
        assert_eq!(json["reason"], "file_dirty");
        assert_eq!(json["file"], "a.md");
    }
}
