use crate::codec::{decode_vectors, encode_vectors};
use crate::embeddings::{EmbeddingKind, EmbeddingProvider, TfidfState};
use crate::error::{Result, VectorStoreError};
use crate::index::{IndexBackend, VectorIndex};
use crate::types::{ChunkRecord, SearchHit};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const INDEX_SCHEMA_VERSION: u32 = 1;

const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.json";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORIZER_FILE: &str = "vectorizer.json";

/// Describes how an index was built; written last so a readable manifest implies a complete index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub schema_version: u32,
    pub dimension: usize,
    pub embedding: EmbeddingKind,
    pub model_id: String,
    /// Unix milliseconds
    pub built_at: u64,
    pub chunk_count: usize,
}

impl IndexManifest {
    #[must_use]
    pub fn for_provider(provider: &dyn EmbeddingProvider, chunk_count: usize) -> Self {
        let built_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            dimension: provider.dimension(),
            embedding: provider.kind(),
            model_id: provider.model_id().to_string(),
            built_at,
            chunk_count,
        }
    }
}

/// Immutable searchable snapshot: vectors, their chunk records and the embedding that made them
pub struct ChunkIndex {
    manifest: IndexManifest,
    index: Box<dyn VectorIndex>,
    chunks: Vec<ChunkRecord>,
    vectorizer: Option<TfidfState>,
}

impl std::fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIndex")
            .field("manifest", &self.manifest)
            .field("backend", &self.index.backend())
            .field("chunks", &self.chunks.len())
            .field("vectorizer", &self.vectorizer.is_some())
            .finish()
    }
}

impl ChunkIndex {
    /// Assemble an index. Row `i` of `vectors` belongs to `chunks[i]`.
    pub fn build(
        backend: IndexBackend,
        manifest: IndexManifest,
        vectors: Vec<Vec<f32>>,
        chunks: Vec<ChunkRecord>,
        vectorizer: Option<TfidfState>,
    ) -> Result<Self> {
        if vectors.len() != chunks.len() || manifest.chunk_count != chunks.len() {
            return Err(VectorStoreError::IndexError(format!(
                "{} vectors and {} chunks for a manifest of {} chunks",
                vectors.len(),
                chunks.len(),
                manifest.chunk_count
            )));
        }
        match &vectorizer {
            Some(state) if state.dimension != manifest.dimension => {
                return Err(VectorStoreError::InvalidDimension {
                    expected: manifest.dimension,
                    actual: state.dimension,
                });
            }
            // Queries could never be embedded into this space
            None if manifest.embedding == EmbeddingKind::Sparse && !chunks.is_empty() => {
                return Err(VectorStoreError::MissingVectorizer {
                    chunks: chunks.len(),
                });
            }
            _ => {}
        }

        let index = backend.build(manifest.dimension, vectors)?;
        Ok(Self {
            manifest,
            index,
            chunks,
            vectorizer,
        })
    }

    #[must_use]
    pub const fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    #[must_use]
    pub fn backend(&self) -> IndexBackend {
        self.index.backend()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    #[must_use]
    pub const fn vectorizer(&self) -> Option<&TfidfState> {
        self.vectorizer.as_ref()
    }

    /// Up to `k` chunks nearest to `query`, best first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let neighbors = self.index.search(query, k)?;
        neighbors
            .into_iter()
            .map(|n| {
                let chunk = self.chunks.get(n.row).cloned().ok_or_else(|| {
                    VectorStoreError::IndexError(format!("row {} has no chunk record", n.row))
                })?;
                Ok(SearchHit {
                    chunk,
                    score: n.score,
                    distance: n.distance,
                })
            })
            .collect()
    }

    /// Write all index files into `dir`, manifest last
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let rows = (0..self.index.len())
            .map(|row| {
                self.index.vector(row).ok_or_else(|| {
                    VectorStoreError::IndexError(format!("row {row} missing from index"))
                })
            })
            .collect::<Result<Vec<&[f32]>>>()?;
        let vectors = encode_vectors(self.manifest.dimension, &rows)?;
        write_atomic(&dir.join(VECTORS_FILE), &vectors).await?;
        write_atomic(&dir.join(CHUNKS_FILE), &serde_json::to_vec_pretty(&self.chunks)?).await?;
        if let Some(state) = &self.vectorizer {
            write_atomic(&dir.join(VECTORIZER_FILE), &serde_json::to_vec(state)?).await?;
        }
        write_atomic(
            &dir.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(&self.manifest)?,
        )
        .await?;

        log::debug!(
            "Saved index ({} chunks, dim {}) to {}",
            self.len(),
            self.manifest.dimension,
            dir.display()
        );
        Ok(())
    }

    /// Read an index written by [`save`](Self::save)
    pub async fn load(dir: impl AsRef<Path>, backend: IndexBackend) -> Result<Self> {
        let dir = dir.as_ref();

        let manifest: IndexManifest =
            serde_json::from_slice(&read_artifact(dir, MANIFEST_FILE).await?).map_err(|e| {
                VectorStoreError::corrupt(MANIFEST_FILE, e.to_string())
            })?;
        if manifest.schema_version != INDEX_SCHEMA_VERSION {
            return Err(VectorStoreError::corrupt(
                MANIFEST_FILE,
                format!(
                    "unsupported schema_version {} (expected {INDEX_SCHEMA_VERSION})",
                    manifest.schema_version
                ),
            ));
        }

        let (dimension, vectors) = decode_vectors(&read_artifact(dir, VECTORS_FILE).await?)?;
        if dimension != manifest.dimension || vectors.len() != manifest.chunk_count {
            return Err(VectorStoreError::corrupt(
                VECTORS_FILE,
                format!(
                    "holds {}x{dimension}, manifest says {}x{}",
                    vectors.len(),
                    manifest.chunk_count,
                    manifest.dimension
                ),
            ));
        }

        let chunks: Vec<ChunkRecord> =
            serde_json::from_slice(&read_artifact(dir, CHUNKS_FILE).await?)
                .map_err(|e| VectorStoreError::corrupt(CHUNKS_FILE, e.to_string()))?;
        if chunks.len() != manifest.chunk_count {
            return Err(VectorStoreError::corrupt(
                CHUNKS_FILE,
                format!(
                    "holds {} records, manifest says {}",
                    chunks.len(),
                    manifest.chunk_count
                ),
            ));
        }

        let vectorizer = match tokio::fs::read(dir.join(VECTORIZER_FILE)).await {
            Ok(bytes) => {
                let state: TfidfState = serde_json::from_slice(&bytes)
                    .map_err(|e| VectorStoreError::corrupt(VECTORIZER_FILE, e.to_string()))?;
                Some(state.validated()?)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        Self::build(backend, manifest, vectors, chunks, vectorizer)
    }
}

async fn read_artifact(dir: &Path, name: &'static str) -> Result<Vec<u8>> {
    match tokio::fs::read(dir.join(name)).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(VectorStoreError::NotFound(format!(
            "{name} in {}",
            dir.display()
        ))),
        Err(err) => Err(err.into()),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}
