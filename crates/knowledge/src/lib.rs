//! Knowledge base for lab cycles
//!
//! A collection ("cycle") owns documents and sessions on disk. Building its
//! index chunks every document, embeds the chunks and publishes an immutable
//! [`ChunkIndex`](cycle_vector_store::ChunkIndex) generation that queries read.
//!
//! ## Example
//!
//! ```no_run
//! use cycle_knowledge::{KnowledgeConfig, NewDocument, RetrievalService};
//!
//! # async fn example() -> cycle_knowledge::Result<()> {
//! let config = KnowledgeConfig::load(None)?;
//! let service = RetrievalService::new(&config)?;
//!
//! service.store().create_collection("c1", "Cycle 1", None).await?;
//! service
//!     .store()
//!     .add_document("c1", NewDocument::new("Incubated at 37 C for 2 h").with_title("Day 1"))
//!     .await?;
//! service.build_knowledge_base_index("c1").await?;
//!
//! let context = service.retrieve_context("c1", "incubation time", None).await?;
//! println!("{context}");
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod fs_util;
mod lock;
mod paths;
mod retrieval;
mod stats;
mod store;
mod types;

pub use config::{
    default_data_dir, default_model_dir, KnowledgeConfig, DEFAULT_MAX_RESULTS, ENV_DATA_DIR,
    ENV_EMBEDDING_MODE, ENV_EMBEDDING_MODEL, ENV_INDEX_BACKEND, ENV_MODEL_DIR,
};
pub use error::{KnowledgeError, Result};
pub use paths::validate_id;
pub use retrieval::{format_for_prompt, RetrievalService, RetrievalSettings};
pub use stats::{BuildOutcome, BuildReport};
pub use store::KnowledgeStore;
pub use types::{
    CollectionMetadata, CollectionSummary, DocumentMeta, KnowledgeBaseStatus, NewDocument,
    SessionRecord, StoredDocument,
};

pub use cycle_chunker::ChunkerConfig;
pub use cycle_vector_store::{EmbeddingKind, EmbeddingMode, IndexBackend, Metadata, SearchHit};
