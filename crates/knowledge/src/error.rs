use cycle_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Document '{document_id}' already exists in collection '{collection_id}'")]
    DocumentExists {
        collection_id: String,
        document_id: String,
    },

    #[error("Invalid {kind} id '{id}': {reason}")]
    InvalidId {
        kind: &'static str,
        id: String,
        reason: &'static str,
    },

    #[error("Session info key '{0}' is reserved")]
    ReservedSessionKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index was built with {index} but the active embedding is {active}; rebuild the index")]
    EmbeddingMismatch { index: String, active: String },

    #[error("Query embedding failed: {0}")]
    QueryEmbedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chunker error: {0}")]
    Chunker(#[from] cycle_chunker::ChunkerError),

    #[error("Vector store error: {0}")]
    VectorStore(VectorStoreError),

    #[error("{0}")]
    Other(String),
}

impl From<VectorStoreError> for KnowledgeError {
    fn from(err: VectorStoreError) -> Self {
        match err {
            VectorStoreError::IncompatibleIndex { index, active } => {
                Self::EmbeddingMismatch { index, active }
            }
            other => Self::VectorStore(other),
        }
    }
}

impl KnowledgeError {
    pub(crate) fn collection_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "collection",
            id: id.to_string(),
        }
    }

    pub(crate) fn document_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "document",
            id: id.to_string(),
        }
    }

    /// True for errors caused by a missing collection or document
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
