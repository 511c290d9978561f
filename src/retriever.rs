//! Retrieval orchestration: question → ranked chunk context.
//!
//! Scoped to one user. Embeds the question, queries that user's vector
//! index, and optionally filters to a set of document ids. The index has
//! no native filter predicate, so a filtered query oversamples — it
//! requests `top_k × oversample_factor` candidates and filters
//! client-side in rank order, stopping at `top_k` matches. The multiplier
//! is a heuristic cushion against the filtered set falling short.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::models::ScoredChunk;
use crate::vector_index::VectorIndex;

pub struct Retriever {
    user_id: String,
    top_k: usize,
    oversample_factor: usize,
    dim: usize,
    store_root: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(
        user_id: impl Into<String>,
        top_k: usize,
        oversample_factor: usize,
        dim: usize,
        store_root: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            top_k,
            oversample_factor,
            dim,
            store_root: store_root.into(),
            embedder,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.store_root.join(&self.user_id)
    }

    /// Retrieve the chunks most relevant to `question`, optionally scoped
    /// to `document_ids`.
    ///
    /// An empty index or a filter that nothing survives returns an empty
    /// vec, never an error. The index is loaded per call; persisted state
    /// is the source of truth between calls.
    pub async fn retrieve(
        &self,
        question: &str,
        document_ids: Option<&HashSet<i64>>,
    ) -> Result<Vec<ScoredChunk>> {
        let index = VectorIndex::open(self.dim, self.index_path())?;
        if index.is_empty() {
            // Nothing to rank; skip the embedding call entirely.
            return Ok(Vec::new());
        }

        let query = embed_query(self.embedder.as_ref(), question).await?;

        let search_k = match document_ids {
            Some(_) => self.top_k * self.oversample_factor,
            None => self.top_k,
        };
        let hits = index.search(&query, search_k)?;
        debug!(
            user_id = %self.user_id,
            candidates = hits.len(),
            filtered = document_ids.is_some(),
            "vector search complete"
        );

        match document_ids {
            Some(ids) => Ok(hits
                .into_iter()
                .filter(|hit| ids.contains(&hit.chunk.document_id))
                .take(self.top_k)
                .collect()),
            None => Ok(hits),
        }
    }
}
