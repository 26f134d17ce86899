//! Line-addressed, overlapping text chunker.
//!
//! Splits a document into [`Chunk`]s bounded by `max_chars_per_chunk`
//! characters. Chunks always cover whole lines, so every chunk can be
//! addressed by an inclusive 1-based line range.
//!
//! # Algorithm
//!
//! 1. Accumulate lines into a buffer.
//! 2. When the next line would push the buffer past the limit, and the
//!    buffer holds at least one line that did not come from the previous
//!    chunk, flush the buffer as a chunk.
//! 3. Seed the next buffer with trailing lines of the flushed chunk totalling
//!    at least `overlap_chars` characters. The first line of a chunk is never
//!    carried over, so a chunk is never repeated wholesale.
//! 4. If the carried-over lines plus the next line do not fit, carried-over
//!    lines are dropped from the front until they do.
//! 5. Stop after `max_chunks_per_file` chunks.
//!
//! A single line longer than the limit becomes its own oversized chunk;
//! lines are never split. Whitespace-only buffers are never emitted.
//!
//! # Example
//!
//! ```rust
//! use notes_recall::chunk::split_text;
//!
//! let spans = split_text("alpha\nbeta\ngamma", 1000, 100, 16);
//! assert_eq!(spans.len(), 1);
//! assert_eq!((spans[0].start_line, spans[0].end_line), (1, 3));
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, ChunkingParams, DocKind};

/// A chunk before it is attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// Split `text` into overlapping spans of whole lines.
pub fn split_text(
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
    max_chunks: usize,
) -> Vec<ChunkSpan> {
    let mut spans = Vec::new();
    if max_chunks == 0 {
        return spans;
    }

    // (1-based line number, line, char count)
    let mut buf: Vec<(usize, &str, usize)> = Vec::new();
    let mut buf_len = 0usize;
    let mut fresh = 0usize;

    for (idx, line) in text.lines().enumerate() {
        let line_len = line.chars().count();

        if fresh > 0 && len_with(&buf, buf_len, line_len) > max_chars {
            push_span(&mut spans, &buf);
            if spans.len() >= max_chunks {
                return spans;
            }
            buf = overlap_seed(&buf, overlap_chars);
            buf_len = joined_len(&buf);
            fresh = 0;
        }

        if fresh == 0 {
            while !buf.is_empty() && len_with(&buf, buf_len, line_len) > max_chars {
                buf.remove(0);
                buf_len = joined_len(&buf);
            }
        }

        buf_len = len_with(&buf, buf_len, line_len);
        buf.push((idx + 1, line, line_len));
        fresh += 1;
    }

    if fresh > 0 {
        push_span(&mut spans, &buf);
    }

    spans
}

/// Chunk a document's text and attach identity to every span.
///
/// Chunk text is capped at `params.max_embed_chars` characters; the line
/// range still describes the full span.
pub fn chunk_document(kind: DocKind, file: &str, text: &str, params: &ChunkingParams) -> Vec<Chunk> {
    split_text(
        text,
        params.max_chars_per_chunk,
        params.overlap_chars,
        params.max_chunks_per_file,
    )
    .into_iter()
    .enumerate()
    .map(|(ordinal, span)| Chunk {
        id: Chunk::make_id(kind, file, ordinal, span.start_line, span.end_line),
        kind,
        file: file.to_string(),
        ordinal,
        start_line: span.start_line,
        end_line: span.end_line,
        text: truncate_chars(&span.text, params.max_embed_chars),
    })
    .collect()
}

/// SHA-256 hex digest of a chunk's text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cut `s` to at most `max` characters, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

fn len_with(buf: &[(usize, &str, usize)], buf_len: usize, line_len: usize) -> usize {
    if buf.is_empty() {
        line_len
    } else {
        buf_len + 1 + line_len
    }
}

fn joined_len(buf: &[(usize, &str, usize)]) -> usize {
    let chars: usize = buf.iter().map(|(_, _, n)| n).sum();
    chars + buf.len().saturating_sub(1)
}

fn push_span(spans: &mut Vec<ChunkSpan>, buf: &[(usize, &str, usize)]) {
    let (Some(first), Some(last)) = (buf.first(), buf.last()) else {
        return;
    };
    let text = buf.iter().map(|(_, l, _)| *l).collect::<Vec<_>>().join("\n");
    if text.trim().is_empty() {
        return;
    }
    spans.push(ChunkSpan {
        start_line: first.0,
        end_line: last.0,
        text,
    });
}

fn overlap_seed<'a>(buf: &[(usize, &'a str, usize)], overlap_chars: usize) -> Vec<(usize, &'a str, usize)> {
    if overlap_chars == 0 || buf.len() < 2 {
        return Vec::new();
    }
    let mut acc = 0usize;
    let mut count = 0usize;
    for (_, _, n) in buf[1..].iter().rev() {
        acc += n + usize::from(count > 0);
        count += 1;
        if acc >= overlap_chars {
            break;
        }
    }
    buf[buf.len() - count..].to_vec()
}
