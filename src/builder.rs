//! Incremental index builder.
//!
//! Orchestrates one build: collect → reuse or chunk → embed → persist.
//!
//! # Reuse
//!
//! A previous index is consulted only when its configuration fingerprint
//! matches the current one exactly and the build is not forced. Reuse then
//! happens at two levels:
//!
//! 1. **Whole file.** When git reports a new `HEAD` since the previous
//!    build, a file is unchanged iff it is neither dirty nor changed between
//!    the two revisions. Otherwise size and mtime must equal the previous
//!    [`FileStamp`]. An unchanged file has its items copied by id without
//!    being read (every recorded id must still be present).
//! 2. **Chunk.** A re-chunked file reuses the vector of any chunk whose id
//!    and `text_hash` both match the previous item.
//!
//! Everything else is embedded in provider-sized batches. The
//! `max_total_chunks` cap applies before embedding, so capped-out chunks are
//! never paid for.
//!
//! # Cancellation
//!
//! The token in [`BuildContext`] is checked between files, before every
//! embedding batch and once more before persisting. A canceled build
//! persists nothing. Provider errors abort the build the same way.

use chrono::{Local, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunk::{chunk_document, hash_text};
use crate::codec;
use crate::collect::collect_documents;
use crate::config::Config;
use crate::embedding::{check_batch, provider_for_build, EmbeddingProvider};
use crate::error::{RecallError, Result};
use crate::git::{self, ChangeSet};
use crate::models::{FileStamp, Fingerprint, Index, IndexItem, IndexMeta};
use crate::progress::BuildProgress;
use crate::store;

/// Per-build runtime handles.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub cancel: CancellationToken,
    pub progress: Option<mpsc::UnboundedSender<BuildProgress>>,
    /// Overrides "today" for the recency window.
    pub today: Option<NaiveDate>,
}

impl BuildContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
            today: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<BuildProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn emit(&self, event: BuildProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(RecallError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Build the index for `root` with the provider selected by `config.build`.
pub async fn build_index(
    root: &Path,
    config: &Config,
    ctx: &BuildContext,
) -> Result<(IndexMeta, Index)> {
    config.build.validate()?;
    let provider = provider_for_build(&config.build, &config.embedding)?;
    build_index_with(root, config, provider.as_ref(), ctx).await
}

/// Build the index for `root` using an already constructed provider.
pub async fn build_index_with(
    root: &Path,
    config: &Config,
    provider: &dyn EmbeddingProvider,
    ctx: &BuildContext,
) -> Result<(IndexMeta, Index)> {
    let started_at = Utc::now();
    let build = &config.build;
    build.validate()?;
    let chunking = build.chunking();
    let fingerprint = Fingerprint::new(
        provider.name(),
        provider.model_name(),
        provider.dims(),
        &build.kinds,
        build.recent_days,
        &chunking,
    );
    let index_dir = config.index_dir(root);

    ctx.emit(BuildProgress::Collecting);
    let today = ctx.today.unwrap_or_else(|| Local::now().date_naive());
    let docs = collect_documents(
        root,
        &build.kinds,
        build.recent_days,
        &config.layout,
        &index_dir,
        today,
    )?;

    let previous = if build.force {
        None
    } else {
        store::load_previous(&index_dir).filter(|(_, meta)| {
            let same = meta.fingerprint() == fingerprint;
            if !same {
                tracing::info!("configuration changed, previous index not reused");
            }
            same
        })
    };
    let prev_index = previous.as_ref().map(|(index, _)| index);
    let prev_items: HashMap<&str, &IndexItem> = prev_index
        .map(|index| {
            index
                .items
                .iter()
                .map(|item| (item.chunk.id.as_str(), item))
                .collect()
        })
        .unwrap_or_default();

    let git_head = git::head(root);
    let change_set = match (&previous, &git_head) {
        (Some((_, meta)), Some(head)) => match &meta.git_head {
            Some(prev_head) if prev_head != head => {
                match ChangeSet::between(root, prev_head, head) {
                    Ok(set) => Some(set),
                    Err(e) => {
                        tracing::warn!(error = %e, "git change detection failed, using file stamps");
                        None
                    }
                }
            }
            _ => None,
        },
        _ => None,
    };

    let mut files: BTreeMap<String, FileStamp> = BTreeMap::new();
    let mut items: Vec<IndexItem> = Vec::new();
    let mut pending: Vec<usize> = Vec::new();
    let mut reused_files = 0usize;
    let mut skipped_files = 0usize;
    let total_docs = docs.len() as u64;

    for (n, doc) in docs.iter().enumerate() {
        ctx.check_canceled()?;
        ctx.emit(BuildProgress::Scanning {
            n: n as u64 + 1,
            total: total_docs,
        });

        let key = doc.key();
        let stat = match std::fs::metadata(&doc.path) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(file = %doc.file, error = %e, "document vanished, skipping");
                skipped_files += 1;
                continue;
            }
        };
        let size = stat.len();
        let mtime_ms = mtime_ms(&stat);

        if let Some(stamp) = prev_index.and_then(|index| index.files.get(&key)) {
            // Git can only veto reuse; ignored files never show up in it.
            let unchanged = stamp.size == size
                && stamp.mtime_ms == mtime_ms
                && change_set.as_ref().map_or(true, |set| !set.touches(&doc.file));
            let reusable = unchanged
                .then(|| {
                    stamp
                        .chunk_ids
                        .iter()
                        .map(|id| prev_items.get(id.as_str()).copied())
                        .collect::<Option<Vec<&IndexItem>>>()
                })
                .flatten();
            if let Some(prev) = reusable {
                tracing::debug!(file = %doc.file, items = prev.len(), "reusing unchanged file");
                reused_files += 1;
                items.extend(prev.into_iter().cloned());
                files.insert(
                    key,
                    FileStamp {
                        kind: doc.kind,
                        file: doc.file.clone(),
                        size,
                        mtime_ms,
                        chunk_ids: stamp.chunk_ids.clone(),
                    },
                );
                continue;
            }
        }

        let text = match doc.read_text() {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(file = %doc.file, error = %e, "document unreadable, skipping");
                skipped_files += 1;
                continue;
            }
        };

        let chunks = chunk_document(doc.kind, &doc.file, &text, &chunking);
        files.insert(
            key,
            FileStamp {
                kind: doc.kind,
                file: doc.file.clone(),
                size,
                mtime_ms,
                chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
            },
        );

        for chunk in chunks {
            let text_hash = hash_text(&chunk.text);
            let vector = match prev_items.get(chunk.id.as_str()) {
                Some(prev) if prev.text_hash == text_hash => prev.vector.clone(),
                _ => {
                    pending.push(items.len());
                    String::new()
                }
            };
            items.push(IndexItem {
                chunk,
                text_hash,
                vector,
            });
        }
    }

    if items.len() > build.max_total_chunks {
        tracing::info!(
            total = items.len(),
            cap = build.max_total_chunks,
            "chunk cap reached, dropping tail"
        );
        items.truncate(build.max_total_chunks);
        pending.retain(|&i| i < build.max_total_chunks);
    }

    let embedded_items = pending.len();
    let reused_items = items.len() - embedded_items;
    let total = embedded_items as u64;
    let mut done = 0u64;
    ctx.emit(BuildProgress::Embedding { done, total });

    for batch in pending.chunks(provider.batch_size().max(1)) {
        ctx.check_canceled()?;
        let texts: Vec<String> = batch.iter().map(|&i| items[i].chunk.text.clone()).collect();
        let vectors = provider.embed_batch(&texts, &ctx.cancel).await?;
        check_batch(&vectors, texts.len(), provider.dims())?;
        for (&i, vector) in batch.iter().zip(vectors.iter()) {
            items[i].vector = codec::encode(vector);
        }
        done += batch.len() as u64;
        ctx.emit(BuildProgress::Embedding { done, total });
    }

    ctx.check_canceled()?;

    items.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));

    let index = Index {
        provider: provider.name().to_string(),
        model: provider.model_name().to_string(),
        dim: provider.dims(),
        files,
        items,
    };
    let meta = IndexMeta {
        provider: index.provider.clone(),
        model: index.model.clone(),
        dim: index.dim,
        kinds: build.kinds.clone(),
        recent_days: build.recent_days,
        chunking,
        item_count: index.items.len(),
        reused_files,
        reused_items,
        embedded_items,
        skipped_files,
        git_head,
        started_at,
        finished_at: Utc::now(),
    };

    ctx.emit(BuildProgress::Writing {
        items: meta.item_count as u64,
    });
    store::write_index_pair(&index_dir, &index, &meta)?;

    tracing::info!(
        items = meta.item_count,
        reused_files,
        reused_items,
        embedded_items,
        skipped_files,
        "index build complete"
    );

    Ok((meta, index))
}

/// Modification time in milliseconds since the epoch, `0` if unavailable.
pub fn mtime_ms(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
