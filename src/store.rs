//! Persistence of the index pair.
//!
//! The index lives in two JSON files under the index directory:
//!
//! ```text
//! {root}/.recall/
//! ├── index.json   # Index: files + items with encoded vectors
//! └── meta.json    # IndexMeta: configuration record and build counts
//! ```
//!
//! Each file is written to a temporary sibling and renamed into place.
//! The index is written first and the meta last, so a reader that finds a
//! meta also finds the complete index it describes.

use std::path::{Path, PathBuf};

use crate::error::{RecallError, Result};
use crate::models::{Index, IndexMeta};

pub const INDEX_FILE: &str = "index.json";
pub const META_FILE: &str = "meta.json";

pub fn index_path(index_dir: &Path) -> PathBuf {
    index_dir.join(INDEX_FILE)
}

pub fn meta_path(index_dir: &Path) -> PathBuf {
    index_dir.join(META_FILE)
}

/// Load `index.json`. A missing file is [`RecallError::NotFound`]; an
/// unparsable one is [`RecallError::Corrupt`].
pub fn load_index(index_dir: &Path) -> Result<Index> {
    load_json(&index_path(index_dir))
}

/// Load `meta.json`, with the same error mapping as [`load_index`].
pub fn load_meta(index_dir: &Path) -> Result<IndexMeta> {
    load_json(&meta_path(index_dir))
}

/// Load both files, or `None` if either is missing or unreadable.
pub fn load_previous(index_dir: &Path) -> Option<(Index, IndexMeta)> {
    let index = match load_index(index_dir) {
        Ok(i) => i,
        Err(e) => {
            tracing::debug!(error = %e, "no reusable previous index");
            return None;
        }
    };
    let meta = match load_meta(index_dir) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "no reusable previous meta");
            return None;
        }
    };
    Some((index, meta))
}

/// Atomically replace both files: index first, then meta.
pub fn write_index_pair(index_dir: &Path, index: &Index, meta: &IndexMeta) -> Result<()> {
    std::fs::create_dir_all(index_dir)?;
    write_atomic(&index_path(index_dir), &serde_json::to_vec(index)?)?;
    write_atomic(&meta_path(index_dir), &serde_json::to_vec_pretty(meta)?)?;
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RecallError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| RecallError::Corrupt(format!("{}: {}", path.display(), e)))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkingParams, DocKind};
    use chrono::Utc;
    use tempfile::TempDir;

    fn meta() -> IndexMeta {
        IndexMeta {
            provider: "local".into(),
            model: "hash-v1".into(),
            dim: 8,
            kinds: vec![DocKind::Notes],
            recent_days: 14,
            chunking: ChunkingParams {
                max_chunks_per_file: 4,
                max_chars_per_chunk: 100,
                overlap_chars: 10,
                max_total_chunks: 100,
                max_embed_chars: 100,
            },
            item_count: 0,
            reused_files: 0,
            reused_items: 0,
            embedded_items: 0,
            skipped_files: 0,
            git_head: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn missing_files_are_not_found() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(load_index(tmp.path()), Err(RecallError::NotFound(_))));
        assert!(matches!(load_meta(tmp.path()), Err(RecallError::NotFound(_))));
        assert!(load_previous(tmp.path()).is_none());
    }

    #[test]
    fn garbage_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(index_path(tmp.path()), "{ not json").unwrap();
        assert!(matches!(load_index(tmp.path()), Err(RecallError::Corrupt(_))));
    }

    #[test]
    fn write_then_load() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join(".recall");
        let index = Index::empty("local", "hash-v1", 8);
        let meta = meta();
        write_index_pair(&dir, &index, &meta).unwrap();

        let (loaded_index, loaded_meta) = load_previous(&dir).unwrap();
        assert_eq!(loaded_index, index);
        assert_eq!(loaded_meta, meta);

        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());

        let raw = std::fs::read_to_string(meta_path(&dir)).unwrap();
        assert!(raw.contains("\"itemCount\""));
        assert!(raw.contains("\"recentDays\""));
    }
}
