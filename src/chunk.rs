//! Bounded-size text chunking.
//!
//! Splits normalized document text into chunks no longer than the configured
//! size. Semantic mode packs whole paragraphs (blank-line boundaries) and
//! falls back to sentence boundaries for oversized paragraphs; character mode
//! slides a fixed window. Overlap carries trailing context from each chunk
//! into the next so retrieval works across chunk boundaries.

use fancy_regex::Regex;
use std::sync::LazyLock;

use crate::config::{ChunkMode, ChunkingConfig};

static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[.!?])\s+").expect("valid regex"));

/// Split text into chunks per the configured mode.
///
/// Sizes are measured in characters. An overlap at or above the chunk size
/// is clamped to `chunk_size - 1` so the window always advances.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    if config.chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }
    let overlap = config.overlap.min(config.chunk_size.saturating_sub(1));

    match config.mode {
        ChunkMode::Semantic => {
            let chunks = semantic_chunks(text, config.chunk_size);
            apply_overlap(chunks, overlap)
        }
        ChunkMode::Character => character_chunks(text, config.chunk_size, overlap),
    }
}

/// Greedy paragraph packing. A paragraph longer than `chunk_size` is
/// re-split on sentence boundaries and packed the same way; a single
/// sentence longer than the limit becomes its own chunk rather than
/// being truncated.
fn semantic_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        if char_len(trimmed) <= chunk_size {
            push_unit(&mut chunks, &mut buf, trimmed, "\n\n", chunk_size);
            continue;
        }

        for sentence in split_sentences(trimmed) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            if char_len(sentence) > chunk_size {
                flush(&mut chunks, &mut buf);
                chunks.push(sentence.to_string());
                continue;
            }
            push_unit(&mut chunks, &mut buf, sentence, " ", chunk_size);
        }
    }

    flush(&mut chunks, &mut buf);
    chunks
}

/// Append a unit to the buffer, flushing first if it would not fit.
fn push_unit(chunks: &mut Vec<String>, buf: &mut String, unit: &str, sep: &str, chunk_size: usize) {
    let would_be = if buf.is_empty() {
        char_len(unit)
    } else {
        char_len(buf) + char_len(sep) + char_len(unit)
    };

    if would_be > chunk_size && !buf.is_empty() {
        flush(chunks, buf);
    }

    if !buf.is_empty() {
        buf.push_str(sep);
    }
    buf.push_str(unit);
}

fn flush(chunks: &mut Vec<String>, buf: &mut String) {
    if !buf.is_empty() {
        chunks.push(std::mem::take(buf));
    }
}

/// Fixed-size sliding window stepping `chunk_size - overlap` characters.
/// The clamp in [`chunk_text`] keeps the step positive, so the loop
/// always reaches the end of the text.
fn character_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size - overlap;
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    out
}

/// Prefix every chunk after the first with the trailing `overlap` characters
/// of its predecessor, joined by a blank line.
fn apply_overlap(chunks: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut out = Vec::with_capacity(chunks.len());
    let mut prev_tail = String::new();

    for (i, chunk) in chunks.into_iter().enumerate() {
        let tail = tail_chars(&chunk, overlap);
        if i == 0 {
            out.push(chunk);
        } else {
            out.push(format!("{}\n\n{}", prev_tail, chunk));
        }
        prev_tail = tail;
    }

    out
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;

    for m in SENTENCE_BOUNDARY.find_iter(paragraph).flatten() {
        if m.start() > last {
            parts.push(&paragraph[last..m.start()]);
        }
        last = m.end();
    }
    if last < paragraph.len() {
        parts.push(&paragraph[last..]);
    }

    parts
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = char_len(s);
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}
