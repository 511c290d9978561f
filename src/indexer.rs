//! Upload-side indexing pipeline: chunk → embed → append → save.
//!
//! Writes to a user's vector index follow load-mutate-save on the on-disk
//! state, so two concurrent writers to the same scope would race (last
//! save wins). [`IndexLocks`] serializes writers per user; reads go
//! through [`Retriever`](crate::retriever::Retriever) against the loaded
//! snapshot and need no lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::chunker::chunk_document;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::ServiceError;
use crate::models::{Chunk, ExtractedDocument};
use crate::vector_index::VectorIndex;

/// Per-user write locks for index mutation.
#[derive(Default)]
pub struct IndexLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IndexLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct Indexer {
    dim: usize,
    store_root: PathBuf,
    chunking: ChunkingConfig,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Indexer {
    pub fn new(
        dim: usize,
        store_root: impl Into<PathBuf>,
        chunking: ChunkingConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            dim,
            store_root: store_root.into(),
            chunking,
            embedder,
        }
    }

    /// Chunk a document without touching the index. Lets the caller
    /// reject an empty document before creating any durable record.
    pub fn chunk(&self, document: &ExtractedDocument, document_id: i64) -> Vec<Chunk> {
        chunk_document(document, document_id, &self.chunking).collect()
    }

    /// Embed pre-computed chunks and append them to the user's index.
    ///
    /// The caller must hold the user's write lock from [`IndexLocks`]
    /// across this call. Returns the number of chunks indexed.
    pub async fn index_chunks(
        &self,
        user_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize, ServiceError> {
        if chunks.is_empty() {
            return Err(ServiceError::NoExtractableText);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(ServiceError::Internal)?;

        let mut index = VectorIndex::open(self.dim, self.store_root.join(user_id))?;
        let count = chunks.len();
        index.add(&vectors, chunks)?;
        index.save()?;

        info!(user_id, chunks = count, total = index.len(), "document indexed");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Page;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Embeds each text to a vector derived from its length, so distinct
    /// chunks land at distinct points.
    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.chars().count() as f32, 0.0, 0.0, 0.0])
                .collect())
        }
    }

    /// Always reports the wrong dimensionality.
    struct WrongDimEmbedder;

    #[async_trait]
    impl EmbeddingProvider for WrongDimEmbedder {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }
    }

    fn doc(text: &str) -> ExtractedDocument {
        ExtractedDocument {
            filename: "notes.txt".to_string(),
            pages: vec![Page {
                page: 1,
                text: text.to_string(),
            }],
        }
    }

    fn indexer(root: &std::path::Path, embedder: Arc<dyn EmbeddingProvider>) -> Indexer {
        Indexer::new(
            4,
            root,
            ChunkingConfig {
                chunk_size: 20,
                overlap: 5,
            },
            embedder,
        )
    }

    #[tokio::test]
    async fn test_index_document_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let idx = indexer(dir.path(), Arc::new(LengthEmbedder));

        let chunks = idx.chunk(&doc("a fairly long piece of text to split"), 5);
        assert!(chunks.len() > 1);
        let n = idx.index_chunks("u1", chunks.clone()).await.unwrap();
        assert_eq!(n, chunks.len());

        let index = VectorIndex::open(4, dir.path().join("u1")).unwrap();
        assert_eq!(index.len(), chunks.len());
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let idx = indexer(dir.path(), Arc::new(LengthEmbedder));
        let chunks = idx.chunk(&doc("   \n\t "), 5);
        let err = idx.index_chunks("u1", chunks).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoExtractableText));
        // Nothing was written.
        assert!(VectorIndex::open(4, dir.path().join("u1"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_surfaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let idx = indexer(dir.path(), Arc::new(WrongDimEmbedder));
        let chunks = idx.chunk(&doc("some content"), 5);
        let err = idx.index_chunks("u1", chunks).await.unwrap_err();
        assert!(matches!(err, ServiceError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_successive_uploads_append() {
        let dir = tempfile::TempDir::new().unwrap();
        let idx = indexer(dir.path(), Arc::new(LengthEmbedder));

        let first = idx.chunk(&doc("first document"), 1);
        let second = idx.chunk(&doc("second document"), 2);
        let total = first.len() + second.len();
        idx.index_chunks("u1", first).await.unwrap();
        idx.index_chunks("u1", second).await.unwrap();

        let index = VectorIndex::open(4, dir.path().join("u1")).unwrap();
        assert_eq!(index.len(), total);
    }
}
