//! Recursive character text splitter.
//!
//! Splits each extracted page into [`Chunk`]s of at most `max_chars`
//! characters, with consecutive chunks sharing up to `overlap_chars`
//! characters. Splitting tries separators from coarsest to finest
//! (paragraph, line, sentence, word, character) and only descends to a finer
//! separator for pieces that are still too large.
//!
//! Separators stay attached to the piece they end, so the pieces of a page
//! concatenate back to the page text exactly; only leading/trailing
//! whitespace of each emitted chunk is trimmed.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, PageText};

/// Separators tried in order. The empty separator splits into characters.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Split extracted pages into chunks, tagging each with its source and page.
pub fn split_pages(pages: &[PageText], source_path: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            split_text(&page.text, config.max_chars, config.overlap_chars)
                .into_iter()
                .map(move |text| make_chunk(source_path, page.page_number, text))
        })
        .collect()
}

/// Split a single text into overlapping pieces of at most `max_chars` characters.
/// Whitespace-only input yields no pieces.
pub fn split_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    split_recursive(text, &SEPARATORS, max_chars.max(1), overlap_chars)
}

fn split_recursive(text: &str, separators: &[&str], max: usize, overlap: usize) -> Vec<String> {
    let sep_idx = separators
        .iter()
        .position(|s| s.is_empty() || text.contains(s))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(sep_idx).copied().unwrap_or("");
    let finer = separators.get(sep_idx + 1..).unwrap_or(&[]);

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split_inclusive(separator).collect()
    };

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for piece in pieces {
        if char_len(piece) <= max {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, max, overlap));
            fitting.clear();
        }
        out.extend(split_recursive(piece, finer, max, overlap));
    }
    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, max, overlap));
    }
    out
}

/// Greedily pack pieces into chunks, carrying a tail of whole pieces of at
/// most `overlap` characters into the next chunk.
fn merge_pieces(pieces: &[&str], max: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > max && !window.is_empty() {
            push_trimmed(&mut chunks, &window);
            // Shrink to the overlap, and far enough that the new piece fits.
            while total > overlap || (total + len > max && total > 0) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece);
        total += len;
    }
    push_trimmed(&mut chunks, &window);
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source_path: &str, page_number: u32, text: String) -> Chunk {
    Chunk {
        text,
        metadata: ChunkMetadata {
            source_path: source_path.to_string(),
            page_number,
        },
    }
}
