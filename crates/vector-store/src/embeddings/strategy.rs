#[cfg(feature = "onnx")]
use super::DenseEncoder;
use super::sparse::SPARSE_MODEL_ID;
use super::{EmbeddingKind, EmbeddingProvider, TfidfEmbedder, DEFAULT_DIMENSION};
use crate::chunk_index::ChunkIndex;
use crate::error::{Result, VectorStoreError};
use crate::models::{default_model_dir, DEFAULT_MODEL_ID};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// Which embedding family to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// Dense if the model loads, otherwise sparse
    #[default]
    Auto,
    Dense,
    Sparse,
}

impl EmbeddingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Dense => "dense",
            Self::Sparse => "sparse",
        }
    }
}

impl Display for EmbeddingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingMode {
    type Err = VectorStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "dense" => Ok(Self::Dense),
            "sparse" | "tfidf" => Ok(Self::Sparse),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unknown embedding mode '{other}' (expected auto, dense or sparse)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub model_id: String,
    /// Directory with model files; `None` uses [`default_model_dir`]
    pub model_dir: Option<PathBuf>,
    /// Sparse vector width, and the dense width when no model manifest says otherwise
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Auto,
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_dir: None,
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl EmbeddingConfig {
    #[must_use]
    pub fn resolved_model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(default_model_dir)
    }
}

#[derive(Debug, Clone)]
enum Selected {
    #[cfg(feature = "onnx")]
    Dense(DenseEncoder),
    Sparse { dimension: usize },
}

/// Embedding family chosen once per service.
///
/// Callers obtain providers from the strategy and never inspect which family won.
#[derive(Debug, Clone)]
pub struct EmbeddingStrategy {
    selected: Selected,
}

impl EmbeddingStrategy {
    /// Pick the embedding family for `config`
    pub fn select(config: &EmbeddingConfig) -> Result<Self> {
        match config.mode {
            EmbeddingMode::Sparse => Ok(Self::sparse(config.dimension)),
            EmbeddingMode::Dense => Self::load_dense(config),
            EmbeddingMode::Auto => Self::load_dense(config).or_else(|err| {
                log::warn!("Dense embeddings unavailable ({err}); using TF-IDF fallback");
                Ok(Self::sparse(config.dimension))
            }),
        }
    }

    #[must_use]
    pub const fn sparse(dimension: usize) -> Self {
        Self {
            selected: Selected::Sparse { dimension },
        }
    }

    #[cfg(feature = "onnx")]
    #[must_use]
    pub const fn dense(encoder: DenseEncoder) -> Self {
        Self {
            selected: Selected::Dense(encoder),
        }
    }

    #[cfg(feature = "onnx")]
    fn load_dense(config: &EmbeddingConfig) -> Result<Self> {
        let spec = crate::models::resolve_model_spec(
            &config.resolved_model_dir(),
            &config.model_id,
            config.dimension,
        )?;
        let encoder = DenseEncoder::load(&spec)?;
        log::info!(
            "Using dense embeddings '{}' (dim {})",
            spec.id,
            encoder.dimension()
        );
        Ok(Self::dense(encoder))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_dense(_config: &EmbeddingConfig) -> Result<Self> {
        Err(VectorStoreError::EmbeddingError(
            "dense embeddings require the `onnx` feature".to_string(),
        ))
    }

    #[must_use]
    pub fn kind(&self) -> EmbeddingKind {
        match &self.selected {
            #[cfg(feature = "onnx")]
            Selected::Dense(_) => EmbeddingKind::Dense,
            Selected::Sparse { .. } => EmbeddingKind::Sparse,
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        match &self.selected {
            #[cfg(feature = "onnx")]
            Selected::Dense(encoder) => encoder.dimension(),
            Selected::Sparse { dimension } => *dimension,
        }
    }

    /// Provider for one index build. Sparse providers start unfitted every time.
    #[must_use]
    pub fn provider_for_build(&self) -> Box<dyn EmbeddingProvider> {
        match &self.selected {
            #[cfg(feature = "onnx")]
            Selected::Dense(encoder) => Box::new(encoder.clone()),
            Selected::Sparse { dimension } => Box::new(TfidfEmbedder::new(*dimension)),
        }
    }

    /// Identifier recorded in index manifests built with this strategy
    #[must_use]
    pub fn model_id(&self) -> &str {
        match &self.selected {
            #[cfg(feature = "onnx")]
            Selected::Dense(encoder) => encoder.model_id(),
            Selected::Sparse { .. } => SPARSE_MODEL_ID,
        }
    }

    /// Provider that embeds queries into the vector space of `index`.
    ///
    /// Fails if the index was built with a different embedding family, model or
    /// dimension than this strategy provides.
    pub fn provider_for_query(&self, index: &ChunkIndex) -> Result<Box<dyn EmbeddingProvider>> {
        let manifest = index.manifest();
        if self.kind() != manifest.embedding
            || self.model_id() != manifest.model_id
            || self.dimension() != manifest.dimension
        {
            return Err(VectorStoreError::IncompatibleIndex {
                index: format!(
                    "{} '{}' (dim {})",
                    manifest.embedding, manifest.model_id, manifest.dimension
                ),
                active: format!(
                    "{} '{}' (dim {})",
                    self.kind(),
                    self.model_id(),
                    self.dimension()
                ),
            });
        }

        match &self.selected {
            #[cfg(feature = "onnx")]
            Selected::Dense(encoder) => Ok(Box::new(encoder.clone())),
            Selected::Sparse { dimension } => match index.vectorizer() {
                Some(state) if state.dimension == *dimension => {
                    Ok(Box::new(TfidfEmbedder::from_state(state.clone())))
                }
                Some(state) => Err(VectorStoreError::corrupt(
                    "vectorizer.json",
                    format!(
                        "vectorizer dimension {} does not match index dimension {dimension}",
                        state.dimension
                    ),
                )),
                None if manifest.chunk_count == 0 => Ok(Box::new(TfidfEmbedder::new(*dimension))),
                None => Err(VectorStoreError::corrupt(
                    "vectorizer.json",
                    "sparse index has no fitted vectorizer",
                )),
            },
        }
    }
}
