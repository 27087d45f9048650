use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[cfg(feature = "onnx")]
mod dense;
mod sparse;
mod strategy;

#[cfg(feature = "onnx")]
pub use dense::DenseEncoder;
pub use sparse::{TfidfEmbedder, TfidfState};
pub use strategy::{EmbeddingConfig, EmbeddingMode, EmbeddingStrategy};

/// Vector width used by the default sentence encoder and the sparse fallback
pub const DEFAULT_DIMENSION: usize = 384;

/// Family of vectors an index was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Dense,
    Sparse,
}

impl EmbeddingKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
        }
    }
}

impl Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`EmbeddingProvider::embed`]: one vector per input text, in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    /// Texts that could not be embedded and were replaced by zero vectors
    pub degraded: usize,
}

impl EmbeddingBatch {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded > 0
    }

    fn push_checked(&mut self, vector: Vec<f32>, dimension: usize) {
        if vector.len() != dimension {
            log::warn!(
                "Embedding has dimension {} (expected {dimension}); substituting zero vector",
                vector.len()
            );
            self.push_zero(dimension);
        } else if vector.iter().any(|v| !v.is_finite()) {
            log::warn!("Embedding contains non-finite values; substituting zero vector");
            self.push_zero(dimension);
        } else {
            self.vectors.push(vector);
        }
    }

    fn push_zero(&mut self, dimension: usize) {
        self.vectors.push(vec![0.0; dimension]);
        self.degraded += 1;
    }
}

/// Turns texts into fixed-width vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn kind(&self) -> EmbeddingKind;

    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// How many texts [`embed`](Self::embed) hands to one `try_embed_batch` call
    fn batch_hint(&self) -> usize {
        usize::MAX
    }

    /// Sees the whole input of [`embed`](Self::embed) before it is split into groups
    async fn prepare(&self, _texts: &[String]) -> Result<()> {
        Ok(())
    }

    /// Embed a whole batch or fail as a whole
    async fn try_embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fitted vectorizer state to persist next to an index, if the provider has one
    fn vectorizer_state(&self) -> Option<TfidfState> {
        None
    }

    /// Embed every text, degrading individual failures to zero vectors.
    ///
    /// Always returns exactly `texts.len()` vectors of [`dimension`](Self::dimension).
    async fn embed(&self, texts: &[String]) -> EmbeddingBatch {
        embed_with_fallback(self, texts).await
    }
}

async fn embed_with_fallback<P>(provider: &P, texts: &[String]) -> EmbeddingBatch
where
    P: EmbeddingProvider + ?Sized,
{
    let dimension = provider.dimension();
    let unit = provider.batch_hint().max(1);
    let mut batch = EmbeddingBatch {
        vectors: Vec::with_capacity(texts.len()),
        degraded: 0,
    };

    if !texts.is_empty() {
        if let Err(err) = provider.prepare(texts).await {
            log::warn!(
                "{} could not prepare for {} texts ({err})",
                provider.model_id(),
                texts.len()
            );
        }
    }

    for group in texts.chunks(unit) {
        tokio::task::yield_now().await;
        match provider.try_embed_batch(group).await {
            Ok(vectors) if vectors.len() == group.len() => {
                for vector in vectors {
                    batch.push_checked(vector, dimension);
                }
            }
            Ok(vectors) => {
                log::warn!(
                    "{} returned {} vectors for {} texts; retrying one by one",
                    provider.model_id(),
                    vectors.len(),
                    group.len()
                );
                embed_individually(provider, group, dimension, &mut batch).await;
            }
            Err(err) if group.len() == 1 => {
                log::warn!("Embedding failed ({err}); substituting zero vector");
                batch.push_zero(dimension);
            }
            Err(err) => {
                log::warn!(
                    "Batch of {} texts failed to embed ({err}); retrying one by one",
                    group.len()
                );
                embed_individually(provider, group, dimension, &mut batch).await;
            }
        }
    }

    if batch.degraded > 0 {
        log::warn!(
            "{} of {} texts degraded to zero vectors ({})",
            batch.degraded,
            texts.len(),
            provider.model_id()
        );
    }
    batch
}

async fn embed_individually<P>(
    provider: &P,
    group: &[String],
    dimension: usize,
    batch: &mut EmbeddingBatch,
) where
    P: EmbeddingProvider + ?Sized,
{
    for text in group {
        tokio::task::yield_now().await;
        match provider.try_embed_batch(std::slice::from_ref(text)).await {
            Ok(mut vectors) if vectors.len() == 1 => {
                batch.push_checked(vectors.remove(0), dimension);
            }
            Ok(vectors) => {
                log::warn!(
                    "Expected one vector, got {}; substituting zero vector",
                    vectors.len()
                );
                batch.push_zero(dimension);
            }
            Err(err) => {
                log::warn!("Embedding failed ({err}); substituting zero vector");
                batch.push_zero(dimension);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorStoreError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails any batch containing "poison"; optionally emits a short vector for "short"
    struct FlakyProvider {
        batch_hint: usize,
        calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(batch_hint: usize) -> Self {
            Self {
                batch_hint,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn kind(&self) -> EmbeddingKind {
            EmbeddingKind::Dense
        }

        fn model_id(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            3
        }

        fn batch_hint(&self) -> usize {
            self.batch_hint
        }

        async fn try_embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(VectorStoreError::EmbeddingError("poisoned".into()));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    if t == "short" {
                        vec![1.0]
                    } else {
                        vec![t.len() as f32, 1.0, 0.0]
                    }
                })
                .collect())
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_clean_batch_is_not_degraded() {
        let provider = FlakyProvider::new(8);
        let batch = provider.embed(&texts(&["a", "bb", "ccc"])).await;
        assert_eq!(batch.degraded, 0);
        assert_eq!(
            batch.vectors,
            vec![
                vec![1.0, 1.0, 0.0],
                vec![2.0, 1.0, 0.0],
                vec![3.0, 1.0, 0.0]
            ]
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_text_degrades_to_zero_vector_in_place() {
        let provider = FlakyProvider::new(8);
        let batch = provider.embed(&texts(&["a", "poison", "ccc"])).await;
        assert_eq!(batch.vectors.len(), 3);
        assert_eq!(batch.degraded, 1);
        assert_eq!(batch.vectors[1], vec![0.0, 0.0, 0.0]);
        assert_eq!(batch.vectors[2], vec![3.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_replaced_and_counted() {
        let provider = FlakyProvider::new(2);
        let batch = provider.embed(&texts(&["short", "bb", "poison"])).await;
        assert_eq!(batch.vectors.len(), 3);
        assert_eq!(batch.degraded, 2);
        assert!(batch.vectors.iter().all(|v| v.len() == 3));
        assert_eq!(batch.vectors[1], vec![2.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_batch() {
        let provider = FlakyProvider::new(4);
        let batch = provider.embed(&[]).await;
        assert!(batch.vectors.is_empty());
        assert!(!batch.is_degraded());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EmbeddingKind::Sparse).unwrap(),
            "\"sparse\""
        );
        assert_eq!(EmbeddingKind::Dense.to_string(), "dense");
    }
}
