//! Text sanitization and chunking.
//!
//! Connector content is split into fixed-size character windows, each tagged
//! with its parent document's identity and a SHA-256 hash of the window. The
//! pipeline cleans each chunk's whitespace before embedding and drops chunks
//! that end up below [`MIN_CHUNK_CHARS`].

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// Cleaned chunks shorter than this are noise, not errors; they are dropped
/// before reaching the embedding boundary.
pub const MIN_CHUNK_CHARS: usize = 10;

/// Window size in characters for splitting document content.
const CHUNK_WINDOW_CHARS: usize = 2000;

/// Normalize whitespace: strip a UTF-8 BOM, collapse runs of whitespace to a
/// single space, trim both ends. Idempotent; all-whitespace input becomes the
/// empty string.
pub fn clean_whitespace(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_whitespace = true;
        } else {
            if in_whitespace && !out.is_empty() {
                out.push(' ');
            }
            in_whitespace = false;
            out.push(ch);
        }
    }
    out
}

/// Split raw document content into chunks of at most [`CHUNK_WINDOW_CHARS`]
/// characters, carrying the document's identity into each chunk.
pub fn split_into_chunks(document: &Document, content: &str) -> Vec<Chunk> {
    let chars: Vec<char> = content.chars().collect();
    let mut chunks = Vec::new();

    for window in chars.chunks(CHUNK_WINDOW_CHARS) {
        let text: String = window.iter().collect();
        if text.trim().is_empty() {
            continue;
        }
        chunks.push(make_chunk(document, text));
    }

    chunks
}

fn make_chunk(document: &Document, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(document.unique_id.as_bytes());
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        text,
        name: document.name.clone(),
        source_url: document.source_url.clone(),
        connector_id: document.connector_id.clone(),
        connector_type: document.connector_type,
        hash,
        document_id: document.unique_id.clone(),
    }
}
