//! Core data models used throughout notes-recall.
//!
//! These types represent the documents, chunks and persisted index records
//! that flow through the build and search pipeline. Everything persisted is
//! serialized with camelCase keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::RecallError;

/// Category tag of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Notes,
    Tasks,
    Log,
    Session,
}

impl DocKind {
    /// Every kind, in default collection order.
    pub const ALL: [DocKind; 4] = [DocKind::Notes, DocKind::Tasks, DocKind::Log, DocKind::Session];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Notes => "notes",
            DocKind::Tasks => "tasks",
            DocKind::Log => "log",
            DocKind::Session => "session",
        }
    }

    /// Time-partitioned kinds are filtered by the recency window.
    pub fn is_dated(&self) -> bool {
        matches!(self, DocKind::Log | DocKind::Session)
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocKind {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notes" => Ok(DocKind::Notes),
            "tasks" => Ok(DocKind::Tasks),
            "log" | "logs" => Ok(DocKind::Log),
            "session" | "sessions" => Ok(DocKind::Session),
            other => Err(RecallError::Config(format!(
                "unknown document kind '{}'. Must be notes, tasks, log, or session.",
                other
            ))),
        }
    }
}

/// A source file selected for indexing. The text is read on demand so that
/// whole-file reuse never touches the file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub kind: DocKind,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Root-relative path with `/` separators.
    pub file: String,
}

impl Document {
    /// Key of this document in [`Index::files`].
    pub fn key(&self) -> String {
        file_key(self.kind, &self.file)
    }

    pub fn read_text(&self) -> std::io::Result<String> {
        std::fs::read_to_string(&self.path)
    }
}

pub fn file_key(kind: DocKind, file: &str) -> String {
    format!("{}:{}", kind, file)
}

/// A line-addressed slice of a document, the unit of embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub kind: DocKind,
    pub file: String,
    pub ordinal: usize,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub text: String,
}

impl Chunk {
    pub fn make_id(kind: DocKind, file: &str, ordinal: usize, start: usize, end: usize) -> String {
        format!("{}:{}:{}:{}-{}", kind, file, ordinal, start, end)
    }
}

/// A chunk with its content hash and encoded vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexItem {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub text_hash: String,
    pub vector: String,
}

/// Per-file bookkeeping used for whole-file reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStamp {
    pub kind: DocKind,
    pub file: String,
    pub size: u64,
    pub mtime_ms: i64,
    pub chunk_ids: Vec<String>,
}

/// Chunking parameters recorded in [`IndexMeta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingParams {
    pub max_chunks_per_file: usize,
    pub max_chars_per_chunk: usize,
    pub overlap_chars: usize,
    pub max_total_chunks: usize,
    pub max_embed_chars: usize,
}

/// The persisted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub provider: String,
    pub model: String,
    pub dim: usize,
    pub files: BTreeMap<String, FileStamp>,
    pub items: Vec<IndexItem>,
}

impl Index {
    pub fn empty(provider: &str, model: &str, dim: usize) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            dim,
            files: BTreeMap::new(),
            items: Vec::new(),
        }
    }
}

/// Build-level metadata, the authoritative configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub provider: String,
    pub model: String,
    pub dim: usize,
    pub kinds: Vec<DocKind>,
    pub recent_days: u32,
    pub chunking: ChunkingParams,
    pub item_count: usize,
    pub reused_files: usize,
    pub reused_items: usize,
    pub embedded_items: usize,
    #[serde(default)]
    pub skipped_files: usize,
    pub git_head: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IndexMeta {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(
            &self.provider,
            &self.model,
            self.dim,
            &self.kinds,
            self.recent_days,
            &self.chunking,
        )
    }
}

/// The parameters that must match exactly for cache reuse across builds.
///
/// `max_total_chunks` is absent: it caps how many items are
/// kept but never changes the text or vector of any single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub provider: String,
    pub model: String,
    pub dim: usize,
    pub kinds: Vec<DocKind>,
    pub recent_days: u32,
    pub max_chunks_per_file: usize,
    pub max_chars_per_chunk: usize,
    pub overlap_chars: usize,
    pub max_embed_chars: usize,
}

impl Fingerprint {
    pub fn new(
        provider: &str,
        model: &str,
        dim: usize,
        kinds: &[DocKind],
        recent_days: u32,
        chunking: &ChunkingParams,
    ) -> Self {
        // Request order decides which kind claims a file matched by several.
        let mut ordered: Vec<DocKind> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !ordered.contains(kind) {
                ordered.push(*kind);
            }
        }
        let kinds = ordered;
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            dim,
            kinds,
            recent_days,
            max_chunks_per_file: chunking.max_chunks_per_file,
            max_chars_per_chunk: chunking.max_chars_per_chunk,
            overlap_chars: chunking.overlap_chars,
            max_embed_chars: chunking.max_embed_chars,
        }
    }
}
