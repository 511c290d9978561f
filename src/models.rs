//! Core data models used throughout KnowledgeForge.
//!
//! These types represent the documents, chunks, turns, and sessions that
//! flow through the upload, retrieval, and chat pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of extracted document text, as produced by the extractor.
#[derive(Debug, Clone)]
pub struct Page {
    pub page: u32,
    pub text: String,
}

/// An extracted document before chunking: an ordered sequence of pages.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub filename: String,
    pub pages: Vec<Page>,
}

/// A document's durable metadata record, owned by a user.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub user_id: String,
    pub filename: String,
    pub created_at: i64,
}

/// A bounded text fragment plus provenance metadata — the unit of retrieval.
///
/// One chunk maps to exactly one stored vector by position in the
/// [`VectorIndex`](crate::vector_index::VectorIndex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub filename: String,
    pub page: u32,
    pub chunk_index: u32,
    pub document_id: i64,
}

/// A retrieval hit: a chunk together with its squared Euclidean distance
/// from the query vector. Lower is closer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub distance: f32,
}

/// One question/answer exchange within a session. Append-only; history is
/// trimmed, never edited.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-session bookkeeping kept alongside the turn history.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// A session's metadata plus its id, as returned by session listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(flatten)]
    pub metadata: SessionMetadata,
}

/// One message in a chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}
