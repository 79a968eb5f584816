//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s that respect a configurable
//! `max_tokens` budget. Splitting occurs on paragraph boundaries (`\n\n`)
//! to preserve semantic coherence within each chunk, and a configurable
//! tail of each chunk is carried into the next one so that context spanning
//! a boundary is retrievable from either side.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` and `overlap_tokens` to characters using a
//!    4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed the budget, then flush the buffer as a chunk.
//! 4. Seed the next buffer with the tail of the flushed chunk (the overlap),
//!    unless the overlap plus the next paragraph would itself exceed the
//!    budget.
//! 5. If a single paragraph exceeds the budget, hard-split it at the nearest
//!    newline or space, snapping to UTF-8 char boundaries. Hard-split pieces
//!    carry no overlap.
//! 6. Guarantee at least one chunk per document (even for empty text).

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate characters-per-token ratio (4 chars ≈ 1 token).
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries.
///
/// # Guarantees
///
/// - At least one chunk is always returned (even for empty text).
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - A chunk that is nothing but carried-over overlap is never emitted.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    if text.is_empty() {
        return vec![make_chunk(document_id, 0, text)];
    }

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    // Buffer holding only carried-over overlap must not be flushed as its
    // own chunk.
    let mut buf_is_seed_only = false;
    let mut chunk_index: i64 = 0;

    for para in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            if buf_is_seed_only {
                current_buf.clear();
            } else {
                chunks.push(make_chunk(document_id, chunk_index, &current_buf));
                chunk_index += 1;
                let seed = overlap_tail(&current_buf, overlap_chars);
                current_buf = seed;
                buf_is_seed_only = !current_buf.is_empty();
                if buf_is_seed_only && current_buf.len() + 2 + trimmed.len() > max_chars {
                    current_buf.clear();
                    buf_is_seed_only = false;
                }
            }
        }

        if trimmed.len() > max_chars {
            if !current_buf.is_empty() && !buf_is_seed_only {
                chunks.push(make_chunk(document_id, chunk_index, &current_buf));
                chunk_index += 1;
            }
            current_buf.clear();
            buf_is_seed_only = false;

            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
                let split_at = if split_at == 0 {
                    remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len())
                } else {
                    split_at
                };
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let actual_split = snap_to_char_boundary(remaining, actual_split);
                let actual_split = if actual_split == 0 {
                    remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len())
                } else {
                    actual_split
                };
                let piece = &remaining[..actual_split];
                if !piece.trim().is_empty() {
                    chunks.push(make_chunk(document_id, chunk_index, piece.trim()));
                    chunk_index += 1;
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
            buf_is_seed_only = false;
        }
    }

    if !current_buf.is_empty() && !buf_is_seed_only {
        chunks.push(make_chunk(document_id, chunk_index, &current_buf));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// The trailing `overlap_chars` of a flushed chunk, snapped forward to a
/// char boundary and preferring to start on a word.
fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    if text.len() <= overlap_chars {
        return text.to_string();
    }
    let mut start = text.len() - overlap_chars;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start().to_string(),
        None => tail.to_string(),
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        token_count: text.len().div_ceil(CHARS_PER_TOKEN) as i64,
        hash,
    }
}
