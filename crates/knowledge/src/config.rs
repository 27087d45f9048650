use crate::{KnowledgeError, Result};
use cycle_chunker::ChunkerConfig;
pub use cycle_vector_store::default_model_dir;
use cycle_vector_store::{EmbeddingConfig, EmbeddingMode, IndexBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_RESULTS: usize = 5;

pub const ENV_DATA_DIR: &str = "CYCLE_DATA_DIR";
pub const ENV_EMBEDDING_MODE: &str = "CYCLE_EMBEDDING_MODE";
pub const ENV_MODEL_DIR: &str = "CYCLE_MODEL_DIR";
pub const ENV_EMBEDDING_MODEL: &str = "CYCLE_EMBEDDING_MODEL";
pub const ENV_INDEX_BACKEND: &str = "CYCLE_INDEX_BACKEND";

/// Settings for a [`crate::RetrievalService`].
///
/// Precedence: defaults, then the TOML file, then `CYCLE_*` environment
/// variables. The CLI applies its flags on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub data_dir: PathBuf,
    pub chunking: ChunkerConfig,
    pub embedding: EmbeddingConfig,
    pub index_backend: IndexBackend,
    pub max_results: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunking: ChunkerConfig::default(),
            embedding: EmbeddingConfig {
                model_dir: Some(default_model_dir()),
                ..EmbeddingConfig::default()
            },
            index_backend: IndexBackend::default(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// `<platform data dir>/cycle-kb/cycles`
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cycle-kb")
        .join("cycles")
}

impl KnowledgeConfig {
    /// Read `path` (if given), apply the process environment and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            KnowledgeError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml(&raw)
            .map_err(|err| KnowledgeError::Config(format!("{}: {err}", path.display())))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| KnowledgeError::Config(err.to_string()))
    }

    /// Apply `CYCLE_*` overrides read through `lookup`. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(dir) = get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(mode) = get(ENV_EMBEDDING_MODE) {
            self.embedding.mode = mode
                .parse::<EmbeddingMode>()
                .map_err(|err| KnowledgeError::Config(format!("{ENV_EMBEDDING_MODE}: {err}")))?;
        }
        if let Some(dir) = get(ENV_MODEL_DIR) {
            self.embedding.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(model) = get(ENV_EMBEDDING_MODEL) {
            self.embedding.model_id = model;
        }
        if let Some(backend) = get(ENV_INDEX_BACKEND) {
            self.index_backend = backend
                .parse::<IndexBackend>()
                .map_err(|err| KnowledgeError::Config(format!("{ENV_INDEX_BACKEND}: {err}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.embedding.dimension == 0 {
            return Err(KnowledgeError::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.embedding.model_id.trim().is_empty() {
            return Err(KnowledgeError::Config(
                "embedding.model_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = KnowledgeConfig::default();
        assert_eq!(config.max_results, 5);
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.overlap, 64);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.embedding.model_id, "all-minilm-l6-v2");
        assert_eq!(config.index_backend, IndexBackend::Exact);
        assert!(config.data_dir.ends_with("cycle-kb/cycles"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = KnowledgeConfig::from_toml(
            r#"
            data_dir = "/srv/cycles"
            index_backend = "brute-force"

            [chunking]
            chunk_size = 128

            [embedding]
            mode = "sparse"
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/cycles"));
        assert_eq!(config.index_backend, IndexBackend::BruteForce);
        assert_eq!(config.chunking.chunk_size, 128);
        assert_eq!(config.chunking.overlap, 64);
        assert_eq!(config.embedding.mode, EmbeddingMode::Sparse);
        assert_eq!(config.max_results, 5);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = KnowledgeConfig::from_toml("max_results = \"many\"").unwrap_err();
        assert!(matches!(err, KnowledgeError::Config(_)), "{err}");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = KnowledgeConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_DATA_DIR, "/tmp/kb"),
                (ENV_EMBEDDING_MODE, "tfidf"),
                (ENV_MODEL_DIR, "/opt/models"),
                (ENV_EMBEDDING_MODEL, "  "),
                (ENV_INDEX_BACKEND, "brute-force"),
            ]))
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/kb"));
        assert_eq!(config.embedding.mode, EmbeddingMode::Sparse);
        assert_eq!(config.embedding.model_dir, Some(PathBuf::from("/opt/models")));
        assert_eq!(config.embedding.model_id, "all-minilm-l6-v2");
        assert_eq!(config.index_backend, IndexBackend::BruteForce);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = KnowledgeConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_EMBEDDING_MODE, "quantum")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_EMBEDDING_MODE), "{err}");
    }

    #[test]
    fn test_validate_rejects_overlap_at_chunk_size() {
        let mut config = KnowledgeConfig::default();
        config.chunking.overlap = config.chunking.chunk_size;
        assert!(matches!(
            config.validate().unwrap_err(),
            KnowledgeError::Chunker(_)
        ));
    }
}
