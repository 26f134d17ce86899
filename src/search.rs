//! Semantic search over a persisted index.
//!
//! Brute-force scan: the query is embedded with the provider recorded in the
//! index (provider, model, dimension), every item is scored by cosine
//! similarity, and the top `k` hits at or above `min_score` are returned.
//!
//! Ordering is deterministic: descending score, ties keep index order
//! (items are persisted sorted by chunk id).

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::config::Config;
use crate::embedding::{cosine_similarity, create_provider, embed_query, ProviderKind};
use crate::error::{RecallError, Result};
use crate::models::{DocKind, Index};
use crate::store;

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub q: String,
    pub k: usize,
    pub min_score: f64,
}

impl SearchQuery {
    /// A query using the `[search]` defaults from `config`.
    pub fn new(q: impl Into<String>, config: &Config) -> Self {
        Self {
            q: q.into(),
            k: config.search.k,
            min_score: config.search.min_score,
        }
    }
}

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub kind: DocKind,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub excerpt: String,
}

/// Search the index under `root`.
///
/// # Errors
///
/// - [`RecallError::NotFound`] when no index has been built.
/// - [`RecallError::Corrupt`] when the index or one of its vectors cannot
///   be decoded.
/// - Provider errors from embedding the query.
pub async fn search(root: &Path, config: &Config, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    let index_dir = config.index_dir(root);
    let index = store::load_index(&index_dir)?;

    if query.q.trim().is_empty() || query.k == 0 {
        return Ok(Vec::new());
    }

    let kind: ProviderKind = index.provider.parse()?;
    let provider = create_provider(kind, &index.model, index.dim, &config.embedding)?;
    let qvec = embed_query(provider.as_ref(), &query.q, &CancellationToken::new()).await?;

    rank(&index, &qvec, query, config.search.excerpt_chars)
}

/// Score every item of `index` against `qvec` and keep the best hits.
pub fn rank(
    index: &Index,
    qvec: &[f32],
    query: &SearchQuery,
    excerpt_chars: usize,
) -> Result<Vec<SearchHit>> {
    let mut scored: Vec<(f64, usize)> = Vec::with_capacity(index.items.len());
    for (pos, item) in index.items.iter().enumerate() {
        let vector = codec::decode(&item.vector)
            .map_err(|e| RecallError::Corrupt(format!("item {}: {}", item.chunk.id, e)))?;
        if vector.len() != qvec.len() {
            return Err(RecallError::Corrupt(format!(
                "item {} has dimension {}, expected {}",
                item.chunk.id,
                vector.len(),
                qvec.len()
            )));
        }
        let score = cosine_similarity(qvec, &vector);
        if score >= query.min_score {
            scored.push((score, pos));
        }
    }

    // stable: equal scores keep index order
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(query.k);

    Ok(scored
        .into_iter()
        .map(|(score, pos)| {
            let chunk = &index.items[pos].chunk;
            SearchHit {
                id: chunk.id.clone(),
                kind: chunk.kind,
                file: chunk.file.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                score,
                excerpt: excerpt(&chunk.text, excerpt_chars),
            }
        })
        .collect())
}

/// Collapse whitespace runs (including newlines) to single spaces and cap
/// at `max_chars`, marking a cut with `…`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, IndexItem};

    fn item(id: &str, vector: &[f32]) -> IndexItem {
        IndexItem {
            chunk: Chunk {
                id: id.to_string(),
                kind: DocKind::Notes,
                file: "NOTES.md".to_string(),
                ordinal: 0,
                start_line: 1,
                end_line: 2,
                text: format!("text of {}\nsecond line", id),
            },
            text_hash: String::new(),
            vector: codec::encode(vector),
        }
    }

    fn index(items: Vec<IndexItem>) -> Index {
        let mut index = Index::empty("local", "hash-v1", 2);
        index.items = items;
        index
    }

    fn query(k: usize, min_score: f64) -> SearchQuery {
        SearchQuery {
            q: "x".into(),
            k,
            min_score,
        }
    }

    #[test]
    fn ranks_by_score_with_stable_ties() {
        let idx = index(vec![
            item("a", &[0.0, 1.0]),
            item("b", &[1.0, 0.0]),
            item("c", &[1.0, 0.0]),
            item("d", &[0.6, 0.8]),
        ]);
        let hits = rank(&idx, &[1.0, 0.0], &query(10, -1.0), 240).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d", "a"]);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn min_score_and_k_filter() {
        let idx = index(vec![item("a", &[0.0, 1.0]), item("b", &[1.0, 0.0]), item("d", &[0.6, 0.8])]);
        let hits = rank(&idx, &[1.0, 0.0], &query(10, 0.5), 240).unwrap();
        assert_eq!(hits.len(), 2);
        let hits = rank(&idx, &[1.0, 0.0], &query(1, 0.0), 240).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn undecodable_vector_is_corrupt() {
        let mut bad = item("a", &[1.0, 0.0]);
        bad.vector = "%%%".into();
        let err = rank(&index(vec![bad]), &[1.0, 0.0], &query(5, 0.0), 240).unwrap_err();
        assert!(matches!(err, RecallError::Corrupt(_)));
    }

    #[test]
    fn excerpt_collapses_and_caps() {
        assert_eq!(excerpt("a\n\nb   c", 240), "a b c");
        let long = "word ".repeat(100);
        let e = excerpt(&long, 20);
        assert_eq!(e.chars().count(), 20);
        assert!(e.ends_with('…'));
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = search(tmp.path(), &Config::default(), &SearchQuery::new("hello", &Config::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::NotFound(_)));
        assert!(err.to_string().contains("run a build first"));
    }
}
