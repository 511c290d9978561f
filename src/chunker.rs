//! Fixed-window overlapping page chunker.
//!
//! Slides a `chunk_size`-character window across each page with a fixed
//! `overlap` (stride = chunk_size − overlap), emitting one [`Chunk`] per
//! non-blank window. Windows are measured in characters, so multi-byte
//! text is never split mid-character.
//!
//! Counting rule: the per-page chunk index increments on every window
//! *attempt*, including whitespace-only windows that are dropped from the
//! output. Indices are therefore monotonically increasing within a page
//! but not necessarily contiguous. The index resets to 0 on each page.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ExtractedDocument, Page};

/// Split a document's pages into overlapping windows.
///
/// Returns a lazy iterator; iterating never mutates shared state, so the
/// same document can be chunked repeatedly with identical results. An
/// empty page yields zero chunks. A document yielding zero chunks overall
/// is the caller's signal that nothing was extractable.
pub fn chunk_document<'a>(
    document: &'a ExtractedDocument,
    document_id: i64,
    config: &ChunkingConfig,
) -> impl Iterator<Item = Chunk> + 'a {
    let chunk_size = config.chunk_size;
    let stride = config.stride();
    let filename = document.filename.clone();

    document.pages.iter().flat_map(move |page| {
        PageWindows::new(page, &filename, document_id, chunk_size, stride)
    })
}

/// Window iterator over a single page.
struct PageWindows {
    text: String,
    filename: String,
    page: u32,
    document_id: i64,
    /// Byte offset of every character boundary, plus the end of the text.
    boundaries: Vec<usize>,
    chunk_size: usize,
    stride: usize,
    /// Current window start, as a character position.
    start: usize,
    chunk_index: u32,
}

impl PageWindows {
    fn new(page: &Page, filename: &str, document_id: i64, chunk_size: usize, stride: usize) -> Self {
        let mut boundaries: Vec<usize> = page.text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(page.text.len());
        Self {
            text: page.text.clone(),
            filename: filename.to_string(),
            page: page.page,
            document_id,
            boundaries,
            chunk_size,
            stride,
            start: 0,
            chunk_index: 0,
        }
    }

    /// Character count of the page (boundaries includes the end sentinel).
    fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl Iterator for PageWindows {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        while self.start < self.char_len() {
            let end = (self.start + self.chunk_size).min(self.char_len());
            let window = &self.text[self.boundaries[self.start]..self.boundaries[end]];

            let index = self.chunk_index;
            self.chunk_index += 1;
            self.start += self.stride;

            if !window.trim().is_empty() {
                return Some(Chunk {
                    text: window.to_string(),
                    filename: self.filename.clone(),
                    page: self.page,
                    chunk_index: index,
                    document_id: self.document_id,
                });
            }
            // Blank window: dropped, but the index above already advanced.
        }
        None
    }
}
