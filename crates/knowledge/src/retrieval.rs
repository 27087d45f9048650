use crate::config::KnowledgeConfig;
use crate::stats::{BuildOutcome, BuildReport};
use crate::store::KnowledgeStore;
use crate::types::StoredDocument;
use crate::{KnowledgeError, Result};
use cycle_chunker::{Chunker, ChunkerConfig};
use cycle_vector_store::{
    ChunkIndex, ChunkRecord, EmbeddingProvider, EmbeddingStrategy, IndexBackend, IndexManifest,
    SearchHit,
};
use std::collections::BTreeSet;
use std::time::Instant;

const CONTEXT_BANNER: &str = "RELEVANT CONTEXT FROM PREVIOUS LAB SESSIONS:\n\n";

/// Build and query knobs that do not depend on the embedding family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub chunking: ChunkerConfig,
    pub index_backend: IndexBackend,
    pub max_results: usize,
}

impl From<&KnowledgeConfig> for RetrievalSettings {
    fn from(config: &KnowledgeConfig) -> Self {
        Self {
            chunking: config.chunking,
            index_backend: config.index_backend,
            max_results: config.max_results,
        }
    }
}

/// Builds collection indexes and answers similarity queries against them
#[derive(Debug, Clone)]
pub struct RetrievalService {
    store: KnowledgeStore,
    strategy: EmbeddingStrategy,
    settings: RetrievalSettings,
    chunker: Chunker,
}

impl RetrievalService {
    /// Select the embedding strategy for `config` and open its data directory
    pub fn new(config: &KnowledgeConfig) -> Result<Self> {
        let strategy = EmbeddingStrategy::select(&config.embedding)?;
        Self::with_strategy(
            KnowledgeStore::new(config.data_dir.clone()),
            strategy,
            RetrievalSettings::from(config),
        )
    }

    pub fn with_strategy(
        store: KnowledgeStore,
        strategy: EmbeddingStrategy,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        let chunker = Chunker::new(settings.chunking)?;
        log::debug!(
            "Retrieval service over {} using {} '{}' (dim {}), {} index",
            store.root().display(),
            strategy.kind(),
            strategy.model_id(),
            strategy.dimension(),
            settings.index_backend
        );
        Ok(Self {
            store,
            strategy,
            settings,
            chunker,
        })
    }

    #[must_use]
    pub const fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    #[must_use]
    pub const fn strategy(&self) -> &EmbeddingStrategy {
        &self.strategy
    }

    #[must_use]
    pub const fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Rebuild the index of a collection from all of its documents.
    ///
    /// Waits for any other build of the same collection to finish first.
    pub async fn build_knowledge_base_index(&self, collection_id: &str) -> Result<BuildOutcome> {
        let start = Instant::now();
        self.store.get_collection(collection_id).await?;
        let _build = self.store.lock_build(collection_id).await?;

        let documents = self.store.load_documents(collection_id).await?;
        if documents.is_empty() {
            log::info!("Collection '{collection_id}' has no documents; nothing to index");
            return Ok(BuildOutcome::NothingToIndex);
        }
        let built_from: BTreeSet<String> = documents.iter().map(|d| d.meta.id.clone()).collect();

        let provider = self.strategy.provider_for_build();
        let built = index_documents(
            &self.chunker,
            provider.as_ref(),
            self.settings.index_backend,
            &documents,
        )
        .await?;
        if built.degraded > 0 {
            log::warn!(
                "{} of {} chunks in '{collection_id}' were stored with zero vectors",
                built.degraded,
                built.index.len()
            );
        }

        let generation = self.store.publish_index(collection_id, &built.index).await?;
        let indexed = self.store.record_build(collection_id, &built_from).await?;

        let manifest = built.index.manifest();
        let report = BuildReport {
            documents: documents.len(),
            chunks: built.index.len(),
            degraded_embeddings: built.degraded,
            dimension: manifest.dimension,
            embedding: manifest.embedding,
            model_id: manifest.model_id.clone(),
            backend: built.index.backend(),
            generation,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            indexed,
        };
        log::info!(
            "Indexed '{collection_id}': {} documents, {} chunks in {}ms",
            report.documents,
            report.chunks,
            report.elapsed_ms
        );
        Ok(BuildOutcome::Built(report))
    }

    /// Chunks most similar to `query`, best first.
    ///
    /// `max_results` falls back to the configured default. A collection that was
    /// never built yields no hits.
    pub async fn retrieve(
        &self,
        collection_id: &str,
        query: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let limit = max_results.unwrap_or(self.settings.max_results);
        let Some(index) = self
            .store
            .load_index(collection_id, self.settings.index_backend)
            .await?
        else {
            log::debug!("No index for '{collection_id}' yet");
            return Ok(Vec::new());
        };
        if limit == 0 || index.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.strategy.provider_for_query(&index)?;
        let embedded = provider.embed(&[query.to_string()]).await;
        if embedded.is_degraded() {
            return Err(KnowledgeError::QueryEmbedding(format!(
                "{} '{}' could not embed the query",
                provider.kind(),
                provider.model_id()
            )));
        }
        let Some(vector) = embedded.vectors.first() else {
            return Err(KnowledgeError::QueryEmbedding(
                "provider returned no vector".to_string(),
            ));
        };

        let hits = index.search(vector, limit)?;
        log::debug!(
            "Query on '{collection_id}' matched {} of {} chunks",
            hits.len(),
            index.len()
        );
        Ok(hits)
    }

    /// [`retrieve`](Self::retrieve) rendered with [`format_for_prompt`]
    pub async fn retrieve_context(
        &self,
        collection_id: &str,
        query: &str,
        max_results: Option<usize>,
    ) -> Result<String> {
        let hits = self.retrieve(collection_id, query, max_results).await?;
        Ok(format_for_prompt(&hits))
    }
}

#[derive(Debug)]
pub(crate) struct BuiltIndex {
    pub(crate) index: ChunkIndex,
    pub(crate) degraded: usize,
}

/// Chunk `documents`, embed every chunk in one batch and assemble the index
pub(crate) async fn index_documents(
    chunker: &Chunker,
    provider: &dyn EmbeddingProvider,
    backend: IndexBackend,
    documents: &[StoredDocument],
) -> Result<BuiltIndex> {
    let mut records = Vec::new();
    for document in documents {
        let before = records.len();
        records.extend(chunker.chunks(&document.text).map(|chunk| ChunkRecord {
            document_id: document.meta.id.clone(),
            title: document.meta.title.clone(),
            chunk_ordinal: chunk.ordinal,
            user_metadata: document.meta.user_metadata.clone(),
            chunk_text: chunk.text,
        }));
        log::debug!(
            "Document '{}' produced {} chunks",
            document.meta.id,
            records.len() - before
        );
    }

    let texts: Vec<String> = records.iter().map(|r| r.chunk_text.clone()).collect();
    let batch = provider.embed(&texts).await;
    let manifest = IndexManifest::for_provider(provider, records.len());
    let index = ChunkIndex::build(
        backend,
        manifest,
        batch.vectors,
        records,
        provider.vectorizer_state(),
    )?;
    Ok(BuiltIndex {
        index,
        degraded: batch.degraded,
    })
}

/// Render hits as a context block for a language-model prompt; `""` when there are none
#[must_use]
pub fn format_for_prompt(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = String::from(CONTEXT_BANNER);
    for hit in hits {
        out.push_str("--- From: ");
        out.push_str(&hit.chunk.title);
        out.push_str(" ---\n");
        out.push_str(&hit.chunk.chunk_text);
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentMeta;
    use async_trait::async_trait;
    use chrono::Utc;
    use cycle_vector_store::{EmbeddingKind, Metadata, VectorStoreError};
    use pretty_assertions::assert_eq;

    const DIM: usize = 8;

    /// Fails on any batch containing "poison"
    struct FlakyProvider;

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn kind(&self) -> EmbeddingKind {
            EmbeddingKind::Dense
        }

        fn model_id(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            DIM
        }

        async fn try_embed_batch(
            &self,
            texts: &[String],
        ) -> cycle_vector_store::Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(cycle_vector_store::VectorStoreError::EmbeddingError(
                    "poisoned".into(),
                ));
            }
            Ok(texts.iter().map(|_| vec![1.0; DIM]).collect())
        }
    }

    fn document(id: &str, text: String) -> StoredDocument {
        StoredDocument {
            meta: DocumentMeta {
                id: id.into(),
                title: format!("Title {id}"),
                added_at: Utc::now(),
                user_metadata: Metadata::new(),
            },
            text,
        }
    }

    fn small_chunker() -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size: 10,
            overlap: 2,
            min_chunk_length: 3,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_degraded_chunks_keep_their_records() {
        let docs = vec![
            document("d1", "alpha beta gamma delta epsilon".into()),
            document("d2", "poison ivy grows near the lab".into()),
            document("d3", "centrifuge at four degrees".into()),
        ];
        let built = index_documents(&small_chunker(), &FlakyProvider, IndexBackend::Exact, &docs)
            .await
            .unwrap();

        assert_eq!(built.index.len(), 3);
        assert_eq!(built.degraded, 1);
        let ids: Vec<_> = built
            .index
            .chunks()
            .iter()
            .map(|c| c.document_id.as_str())
            .collect();
        assert_eq!(ids, vec!["d1", "d2", "d3"]);
    }

    #[tokio::test]
    async fn test_chunk_records_carry_document_fields() {
        let words: Vec<String> = (0..20).map(|i| format!("w{i}")).collect();
        let mut doc = document("d1", words.join(" "));
        doc.meta
            .user_metadata
            .insert("session_id".into(), serde_json::json!("s9"));

        let built = index_documents(&small_chunker(), &FlakyProvider, IndexBackend::Exact, &[doc])
            .await
            .unwrap();
        let ordinals: Vec<_> = built
            .index
            .chunks()
            .iter()
            .map(|c| c.chunk_ordinal)
            .collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        assert!(built
            .index
            .chunks()
            .iter()
            .all(|c| c.title == "Title d1" && c.user_metadata["session_id"] == "s9"));
    }

    #[tokio::test]
    async fn test_sparse_build_without_terms_fails() {
        let letters = "a b c d e f g h i j ".repeat(3);
        let docs = vec![document("d1", letters)];
        let provider = EmbeddingStrategy::sparse(DIM).provider_for_build();
        let err = index_documents(&small_chunker(), provider.as_ref(), IndexBackend::Exact, &docs)
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                KnowledgeError::VectorStore(VectorStoreError::MissingVectorizer { .. })
            ),
            "{err}"
        );
    }

    #[test]
    fn test_format_for_prompt() {
        assert_eq!(format_for_prompt(&[]), "");

        let hit = |title: &str, text: &str| SearchHit {
            chunk: ChunkRecord {
                document_id: "d".into(),
                title: title.into(),
                chunk_ordinal: 0,
                user_metadata: Metadata::new(),
                chunk_text: text.into(),
            },
            score: 1.0,
            distance: 0.0,
        };
        let out = format_for_prompt(&[hit("Run 1", "pH 7.4"), hit("Run 2", "37 C")]);
        assert_eq!(
            out,
            "RELEVANT CONTEXT FROM PREVIOUS LAB SESSIONS:\n\n\
             --- From: Run 1 ---\npH 7.4\n\n\
             --- From: Run 2 ---\n37 C\n\n"
        );
    }
}
