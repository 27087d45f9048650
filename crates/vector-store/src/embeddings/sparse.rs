use super::{EmbeddingKind, EmbeddingProvider};
use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub(crate) const SPARSE_MODEL_ID: &str = "tfidf";

/// Texts transformed per group once the vocabulary is fitted
const TRANSFORM_BATCH: usize = 64;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").expect("valid regex"));

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
}

/// Fitted TF-IDF vocabulary. Column `i` is `vocabulary[i]`, weighted by `idf[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfState {
    pub dimension: usize,
    pub vocabulary: Vec<String>,
    pub idf: Vec<f32>,
    #[serde(skip)]
    columns: HashMap<String, usize>,
}

impl TfidfState {
    /// Fit on a corpus. Returns `None` when no text contains a token.
    #[must_use]
    pub fn fit(texts: &[String], dimension: usize) -> Option<Self> {
        // term -> (corpus frequency, document frequency)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for text in texts {
            let mut seen: HashMap<String, usize> = HashMap::new();
            for token in tokenize(text) {
                *seen.entry(token).or_default() += 1;
            }
            for (term, tf) in seen {
                let entry = counts.entry(term).or_default();
                entry.0 += tf;
                entry.1 += 1;
            }
        }
        if counts.is_empty() || dimension == 0 {
            return None;
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(term, (tf, df))| (term, tf, df))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(dimension);
        ranked.sort_by(|a, b| a.0.cmp(&b.0));

        let n = texts.len() as f32;
        let idf = ranked
            .iter()
            .map(|(_, _, df)| ((1.0 + n) / (1.0 + *df as f32)).ln() + 1.0)
            .collect();
        let vocabulary = ranked.into_iter().map(|(term, _, _)| term).collect();

        Some(Self::from_parts(dimension, vocabulary, idf))
    }

    fn from_parts(dimension: usize, vocabulary: Vec<String>, idf: Vec<f32>) -> Self {
        let columns = vocabulary
            .iter()
            .enumerate()
            .map(|(idx, term)| (term.clone(), idx))
            .collect();
        Self {
            dimension,
            vocabulary,
            idf,
            columns,
        }
    }

    /// Check invariants and rebuild the term lookup after deserialization
    pub fn validated(self) -> Result<Self> {
        if self.vocabulary.len() != self.idf.len() {
            return Err(VectorStoreError::corrupt(
                "vectorizer.json",
                format!(
                    "{} terms but {} idf weights",
                    self.vocabulary.len(),
                    self.idf.len()
                ),
            ));
        }
        if self.vocabulary.is_empty() || self.vocabulary.len() > self.dimension {
            return Err(VectorStoreError::corrupt(
                "vectorizer.json",
                format!(
                    "vocabulary size {} does not fit dimension {}",
                    self.vocabulary.len(),
                    self.dimension
                ),
            ));
        }
        Ok(Self::from_parts(self.dimension, self.vocabulary, self.idf))
    }

    /// Number of fitted terms (may be below `dimension`)
    #[must_use]
    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    /// L2-normalised TF-IDF row, zero-padded to `dimension`
    #[must_use]
    pub fn transform(&self, text: &str) -> Vec<f32> {
        let mut row = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            if let Some(&col) = self.columns.get(&token) {
                row[col] += 1.0;
            }
        }
        for (value, idf) in row.iter_mut().zip(&self.idf) {
            *value *= idf;
        }
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut row {
                *value /= norm;
            }
        }
        row
    }
}

/// TF-IDF fallback embedder.
///
/// [`embed`](EmbeddingProvider::embed) fits the vocabulary on its whole input.
/// A direct `try_embed_batch` on an unfitted embedder fits on that batch.
/// Either way the first fit sticks.
pub struct TfidfEmbedder {
    dimension: usize,
    state: Mutex<Option<TfidfState>>,
}

impl TfidfEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: Mutex::new(None),
        }
    }

    /// Restore a provider fitted by an earlier build
    #[must_use]
    pub fn from_state(state: TfidfState) -> Self {
        Self {
            dimension: state.dimension,
            state: Mutex::new(Some(state)),
        }
    }

    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl TfidfEmbedder {
    fn fit_if_needed(&self, state: &mut Option<TfidfState>, texts: &[String]) -> Result<()> {
        if state.is_some() {
            return Ok(());
        }
        let fitted = TfidfState::fit(texts, self.dimension).ok_or_else(|| {
            VectorStoreError::EmbeddingError(
                "TF-IDF vocabulary is empty; nothing to fit".to_string(),
            )
        })?;
        log::info!(
            "Fitted TF-IDF vocabulary: {} terms from {} texts (dim {})",
            fitted.vocabulary_len(),
            texts.len(),
            self.dimension
        );
        *state = Some(fitted);
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for TfidfEmbedder {
    fn kind(&self) -> EmbeddingKind {
        EmbeddingKind::Sparse
    }

    fn model_id(&self) -> &str {
        SPARSE_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_hint(&self) -> usize {
        TRANSFORM_BATCH
    }

    async fn prepare(&self, texts: &[String]) -> Result<()> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.fit_if_needed(&mut guard, texts)
    }

    async fn try_embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.fit_if_needed(&mut guard, texts)?;
        let Some(state) = guard.as_ref() else {
            return Err(VectorStoreError::EmbeddingError(
                "TF-IDF vectorizer is not fitted".to_string(),
            ));
        };
        Ok(texts.iter().map(|text| state.transform(text)).collect())
    }

    fn vectorizer_state(&self) -> Option<TfidfState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn corpus() -> Vec<String> {
        vec![
            "The buffer pH drifted during titration".to_string(),
            "Titration repeated with fresh buffer".to_string(),
            "Centrifuge rotor imbalance".to_string(),
        ]
    }

    #[test]
    fn test_tokens_are_lowercased_and_skip_single_chars() {
        let tokens: Vec<_> = tokenize("A pH of 7 in HEPES-buffer").collect();
        assert_eq!(tokens, vec!["ph", "of", "in", "hepes", "buffer"]);
    }

    #[test]
    fn test_fit_orders_columns_alphabetically() {
        let state = TfidfState::fit(&corpus(), 384).unwrap();
        let mut sorted = state.vocabulary.clone();
        sorted.sort();
        assert_eq!(state.vocabulary, sorted);
        assert!(state.vocabulary.contains(&"titration".to_string()));
        assert_eq!(state.idf.len(), state.vocabulary.len());
    }

    #[test]
    fn test_idf_matches_smoothed_formula() {
        let state = TfidfState::fit(&corpus(), 384).unwrap();
        let col = state.vocabulary.iter().position(|t| t == "buffer").unwrap();
        // n = 3, df = 2
        let expected = (4.0f32 / 3.0).ln() + 1.0;
        assert!((state.idf[col] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_max_features_keeps_most_frequent_terms() {
        let texts = vec!["beta beta beta alpha alpha gamma".to_string()];
        let state = TfidfState::fit(&texts, 2).unwrap();
        assert_eq!(state.vocabulary, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_rows_are_unit_length_and_padded() {
        let state = TfidfState::fit(&corpus(), 384).unwrap();
        let row = state.transform("buffer titration buffer");
        assert_eq!(row.len(), 384);
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(row[state.vocabulary_len()..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_unknown_terms_give_zero_row() {
        let state = TfidfState::fit(&corpus(), 16).unwrap();
        assert!(state.transform("zebra").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_empty_corpus_does_not_fit() {
        assert!(TfidfState::fit(&["! ? 1".to_string()], 8).is_none());
        assert!(TfidfState::fit(&[], 8).is_none());
    }

    #[test]
    fn test_state_survives_json_round_trip() {
        let state = TfidfState::fit(&corpus(), 32).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let restored: TfidfState = serde_json::from_str(&json).unwrap();
        let restored = restored.validated().unwrap();
        assert_eq!(
            restored.transform("fresh buffer"),
            state.transform("fresh buffer")
        );
    }

    #[test]
    fn test_validated_rejects_mismatched_weights() {
        let mut state = TfidfState::fit(&corpus(), 32).unwrap();
        state.idf.pop();
        assert!(state.validated().is_err());
    }

    #[tokio::test]
    async fn test_first_batch_fits_and_later_batches_reuse() {
        let embedder = TfidfEmbedder::new(64);
        assert!(!embedder.is_fitted());
        let first = embedder.try_embed_batch(&corpus()).await.unwrap();
        assert_eq!(first.len(), 3);
        let fitted = embedder.vectorizer_state().unwrap();

        let _ = embedder
            .try_embed_batch(&["entirely different words here".to_string()])
            .await
            .unwrap();
        assert_eq!(embedder.vectorizer_state().unwrap(), fitted);
    }

    #[tokio::test]
    async fn test_empty_vocabulary_is_batch_failure() {
        let embedder = TfidfEmbedder::new(8);
        let err = embedder.try_embed_batch(&["a b c".to_string()]).await;
        assert!(err.is_err());
        assert!(!embedder.is_fitted());
    }

    #[tokio::test]
    async fn test_restored_embedder_matches_original_space() {
        let embedder = TfidfEmbedder::new(64);
        let _ = embedder.try_embed_batch(&corpus()).await.unwrap();
        let restored = TfidfEmbedder::from_state(embedder.vectorizer_state().unwrap());
        let query = vec!["buffer drift".to_string()];
        assert_eq!(
            restored.try_embed_batch(&query).await.unwrap(),
            embedder.try_embed_batch(&query).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_embed_fits_on_the_whole_input() {
        let mut texts: Vec<String> = (0..TRANSFORM_BATCH * 2)
            .map(|i| format!("buffer titration run {i}"))
            .collect();
        texts.push("centrifuge rotor imbalance".to_string());

        let embedder = TfidfEmbedder::new(384);
        assert!(embedder.batch_hint() < texts.len());
        let batch = embedder.embed(&texts).await;
        assert_eq!(batch.vectors.len(), texts.len());
        assert_eq!(batch.degraded, 0);

        let state = embedder.vectorizer_state().unwrap();
        assert!(state.vocabulary.contains(&"centrifuge".to_string()));
        let last = batch.vectors.last().unwrap();
        assert!(last.iter().any(|v| *v > 0.0));
    }
}
