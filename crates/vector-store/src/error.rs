use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Sparse index of {chunks} chunks has no fitted vectorizer; no chunk contains an indexable term")]
    MissingVectorizer { chunks: usize },

    #[error("Index was built with {index} but the active embedding is {active}")]
    IncompatibleIndex { index: String, active: String },

    #[error("Corrupt index artifact {artifact}: {reason}")]
    CorruptArtifact {
        artifact: &'static str,
        reason: String,
    },
}

impl VectorStoreError {
    pub(crate) fn corrupt(artifact: &'static str, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            artifact,
            reason: reason.into(),
        }
    }
}
