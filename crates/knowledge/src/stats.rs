use cycle_vector_store::{EmbeddingKind, IndexBackend};
use serde::{Deserialize, Serialize};

/// Statistics about one index build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Documents read from the collection
    pub documents: usize,

    /// Chunk records in the published index
    pub chunks: usize,

    /// Chunks stored with a zero vector because embedding failed
    pub degraded_embeddings: usize,

    pub dimension: usize,
    pub embedding: EmbeddingKind,
    pub model_id: String,
    pub backend: IndexBackend,

    /// Directory name of the published index generation
    pub generation: String,

    /// Time taken in milliseconds
    pub elapsed_ms: u64,

    /// False when documents were added while the build ran
    pub indexed: bool,
}

impl BuildReport {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded_embeddings > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// The collection has no documents; metadata was left untouched
    NothingToIndex,
    Built(BuildReport),
}

impl BuildOutcome {
    #[must_use]
    pub const fn report(&self) -> Option<&BuildReport> {
        match self {
            Self::NothingToIndex => None,
            Self::Built(report) => Some(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_json_is_tagged() {
        assert_eq!(
            serde_json::to_value(BuildOutcome::NothingToIndex).unwrap(),
            json!({"status": "nothing_to_index"})
        );

        let report = BuildReport {
            documents: 1,
            chunks: 2,
            degraded_embeddings: 0,
            dimension: 384,
            embedding: EmbeddingKind::Sparse,
            model_id: "tfidf".into(),
            backend: IndexBackend::Exact,
            generation: "20240101T000000000Z".into(),
            elapsed_ms: 12,
            indexed: true,
        };
        let value = serde_json::to_value(BuildOutcome::Built(report.clone())).unwrap();
        assert_eq!(value["status"], "built");
        assert_eq!(value["chunks"], 2);
        assert_eq!(value["embedding"], "sparse");
        assert!(!report.is_degraded());
    }
}
