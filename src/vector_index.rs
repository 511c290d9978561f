//! Per-user exact nearest-neighbor store with disk persistence.
//!
//! Vectors are held as one flat `f32` buffer; chunk metadata lives in a
//! parallel array joined by position. `vectors.len() / dim ==
//! metadata.len()` must hold across every add/save/load cycle — every
//! mutation path preserves it and `load` verifies it.
//!
//! Search is brute-force squared Euclidean distance. Per-user corpora are
//! small enough that an approximate index would cost more engineering than
//! it buys; callers only see [`VectorIndex::search`], so an approximate
//! backend can replace the scan without changing them.
//!
//! Persistence is two files under the scope directory:
//! `index.bin` (header: dim `u32` LE, count `u64` LE; then count×dim `f32`
//! LE) and `metadata.json`. `load` reads both or neither: a missing or
//! half-written location leaves the index empty.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::error::ServiceError;
use crate::models::{Chunk, ScoredChunk};

const INDEX_FILE: &str = "index.bin";
const METADATA_FILE: &str = "metadata.json";

pub struct VectorIndex {
    dim: usize,
    /// Flat row-major buffer, `len == dim * metadata.len()`.
    vectors: Vec<f32>,
    metadata: Vec<Chunk>,
    store_path: PathBuf,
}

impl VectorIndex {
    pub fn new(dim: usize, store_path: impl Into<PathBuf>) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
            metadata: Vec::new(),
            store_path: store_path.into(),
        }
    }

    /// Open the index at `store_path` and load any persisted state.
    pub fn open(dim: usize, store_path: impl Into<PathBuf>) -> Result<Self> {
        let mut index = Self::new(dim, store_path);
        index.load()?;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Append vectors and their metadata in order.
    ///
    /// Rejects the whole batch if any vector's length differs from the
    /// index dimension or the counts disagree; a partial append would
    /// break the positional join.
    pub fn add(&mut self, vectors: &[Vec<f32>], metadatas: Vec<Chunk>) -> Result<(), ServiceError> {
        if vectors.len() != metadatas.len() {
            return Err(ServiceError::DimensionMismatch {
                expected: vectors.len(),
                actual: metadatas.len(),
            });
        }
        for v in vectors {
            if v.len() != self.dim {
                return Err(ServiceError::DimensionMismatch {
                    expected: self.dim,
                    actual: v.len(),
                });
            }
        }

        for v in vectors {
            self.vectors.extend_from_slice(v);
        }
        self.metadata.extend(metadatas);
        Ok(())
    }

    /// Nearest neighbors of `query`, ascending by squared Euclidean
    /// distance, ties broken by insertion order.
    ///
    /// An empty index returns an empty vec; `k` larger than the entry
    /// count is clamped. Result length is always ≤ k.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, ServiceError> {
        if query.len() != self.dim {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let k = k.min(self.len());
        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(i, row)| (squared_l2(query, row), i))
            .collect();
        // Stable on equal distances, so insertion order decides ties.
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, i)| ScoredChunk {
                chunk: self.metadata[i].clone(),
                distance,
            })
            .collect())
    }

    /// Persist both the vector buffer and the metadata sidecar under the
    /// scope directory.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.store_path).with_context(|| {
            format!("Failed to create index dir: {}", self.store_path.display())
        })?;

        let mut buf = Vec::with_capacity(12 + self.vectors.len() * 4);
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());
        for &v in &self.vectors {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        fs::write(self.store_path.join(INDEX_FILE), &buf)?;

        let json = serde_json::to_vec(&self.metadata)?;
        fs::write(self.store_path.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// Load persisted state, replacing the in-memory contents.
    ///
    /// A non-existent location is a no-op leaving an empty index. If only
    /// one of the two files exists the index also loads empty rather than
    /// resurrecting half the pair.
    pub fn load(&mut self) -> Result<()> {
        let index_file = self.store_path.join(INDEX_FILE);
        let meta_file = self.store_path.join(METADATA_FILE);

        if !index_file.exists() || !meta_file.exists() {
            self.vectors.clear();
            self.metadata.clear();
            return Ok(());
        }

        let buf = fs::read(&index_file)
            .with_context(|| format!("Failed to read {}", index_file.display()))?;
        if buf.len() < 12 {
            bail!("index file too short: {}", index_file.display());
        }
        let dim = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let count = u64::from_le_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]) as usize;

        if dim != self.dim {
            bail!(
                "index dimension {} does not match configured dimension {}",
                dim,
                self.dim
            );
        }
        let expected_bytes = 12 + count * dim * 4;
        if buf.len() != expected_bytes {
            bail!(
                "index file {} is {} bytes, expected {}",
                index_file.display(),
                buf.len(),
                expected_bytes
            );
        }

        let vectors: Vec<f32> = buf[12..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let metadata: Vec<Chunk> = serde_json::from_slice(
            &fs::read(&meta_file)
                .with_context(|| format!("Failed to read {}", meta_file.display()))?,
        )?;

        if metadata.len() != count {
            bail!(
                "metadata count {} does not match index count {} at {}",
                metadata.len(),
                count,
                self.store_path.display()
            );
        }

        self.vectors = vectors;
        self.metadata = metadata;
        Ok(())
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
