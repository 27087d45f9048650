//! # Cycle Vector Store
//!
//! Embeddings, nearest-neighbour indexes and index persistence for the cycle knowledge base.
//!
//! ## Features
//!
//! - **Dense embeddings** from a sentence encoder on ONNX Runtime (cargo feature `onnx`)
//! - **Sparse fallback** via a fit-once TF-IDF vectorizer whose state persists with the index
//! - **Exact search** over a flat `ndarray` matrix, or a plain brute-force scan
//! - **Persistent snapshots**: binary vectors + JSON chunk table + manifest
//!
//! ## Architecture
//!
//! ```text
//! chunk texts
//!     │
//!     ├──> EmbeddingStrategy (chosen once)
//!     │      ├─> DenseEncoder (ONNX, mean pooling)
//!     │      └─> TfidfEmbedder (fallback)
//!     │
//!     ├──> VectorIndex (Exact | BruteForce)
//!     │      └─> L2 distance, score = 1 / (1 + d)
//!     │
//!     └──> ChunkIndex::save / ChunkIndex::load
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use cycle_vector_store::{
//!     ChunkIndex, ChunkRecord, EmbeddingStrategy, IndexBackend, IndexManifest, Metadata,
//! };
//!
//! #[tokio::main]
//! async fn main() -> cycle_vector_store::Result<()> {
//!     let strategy = EmbeddingStrategy::sparse(384);
//!     let provider = strategy.provider_for_build();
//!
//!     let texts = vec!["pipette calibration notes".to_string()];
//!     let batch = provider.embed(&texts).await;
//!     let chunks = vec![ChunkRecord {
//!         document_id: "d1".into(),
//!         title: "Calibration".into(),
//!         chunk_ordinal: 0,
//!         user_metadata: Metadata::new(),
//!         chunk_text: texts[0].clone(),
//!     }];
//!
//!     let manifest = IndexManifest::for_provider(provider.as_ref(), chunks.len());
//!     let index = ChunkIndex::build(
//!         IndexBackend::Exact,
//!         manifest,
//!         batch.vectors,
//!         chunks,
//!         provider.vectorizer_state(),
//!     )?;
//!     index.save("index-dir").await?;
//!     Ok(())
//! }
//! ```

mod chunk_index;
mod codec;
mod embeddings;
mod error;
mod index;
mod models;
mod types;

pub use chunk_index::{ChunkIndex, IndexManifest, INDEX_SCHEMA_VERSION};
#[cfg(feature = "onnx")]
pub use embeddings::DenseEncoder;
pub use embeddings::{
    EmbeddingBatch, EmbeddingConfig, EmbeddingKind, EmbeddingMode, EmbeddingProvider,
    EmbeddingStrategy, TfidfEmbedder, TfidfState, DEFAULT_DIMENSION,
};
pub use error::{Result, VectorStoreError};
pub use index::{
    similarity_from_distance, BruteForceIndex, FlatIndex, IndexBackend, Neighbor, VectorIndex,
};
pub use models::{default_model_dir, resolve_model_spec, ModelSpec, DEFAULT_MODEL_ID};
pub use types::{ChunkRecord, Metadata, SearchHit};
