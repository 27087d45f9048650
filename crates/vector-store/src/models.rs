use crate::error::{Result, VectorStoreError};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

/// Sentence encoder used when nothing else is configured
pub const DEFAULT_MODEL_ID: &str = "all-minilm-l6-v2";

const MODELS_CACHE_DIR_NAME: &str = "cycle-kb";
const DEFAULT_MAX_LENGTH: usize = 512;
const DEFAULT_MAX_BATCH: usize = 32;

/// Resolved files and limits for one dense model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub max_batch: usize,
}

impl ModelSpec {
    #[must_use]
    pub fn files_present(&self) -> bool {
        self.model_path.is_file() && self.tokenizer_path.is_file()
    }
}

#[derive(Debug, Deserialize)]
struct ModelsManifest {
    schema_version: u32,
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize)]
struct ManifestModel {
    id: String,
    dimension: usize,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    max_batch: Option<usize>,
    #[serde(default)]
    onnx: Option<String>,
    #[serde(default)]
    tokenizer: Option<String>,
}

/// Default directory holding `<model_id>/model.onnx` and `<model_id>/tokenizer.json`:
/// `<platform cache dir>/cycle-kb/models`
#[must_use]
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(MODELS_CACHE_DIR_NAME)
        .join("models")
}

/// Map common aliases to the directory name used under the model dir
fn normalize_model_id(raw: &str) -> String {
    let id = raw.trim().to_ascii_lowercase();
    match id.as_str() {
        "sentence-transformers/all-minilm-l6-v2" | "all-minilm-l6" | "minilm" => {
            DEFAULT_MODEL_ID.to_string()
        }
        _ => id,
    }
}

fn validate_relative_manifest_path(path: &Path) -> Result<()> {
    let mut has_component = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(VectorStoreError::EmbeddingError(
                    "models manifest asset path must be relative".to_string(),
                ));
            }
            Component::ParentDir => {
                return Err(VectorStoreError::EmbeddingError(
                    "models manifest asset path must not contain '..'".to_string(),
                ));
            }
            Component::CurDir => {}
            Component::Normal(_) => has_component = true,
        }
    }

    if !has_component {
        return Err(VectorStoreError::EmbeddingError(
            "models manifest asset path is empty".to_string(),
        ));
    }
    Ok(())
}

fn asset_path(base: &Path, model_id: &str, rel: Option<&str>, default: &str) -> Result<PathBuf> {
    let rel = rel.unwrap_or(default);
    validate_relative_manifest_path(Path::new(rel)).map_err(|err| {
        VectorStoreError::EmbeddingError(format!(
            "Invalid asset path for model '{model_id}': '{rel}' ({err})"
        ))
    })?;
    Ok(base.join(rel))
}

/// Resolve the files and limits for `model_id` under `model_dir`.
///
/// An optional `manifest.json` (schema_version 1) overrides dimension, limits and
/// asset paths. Without one, the conventional file names and `default_dimension`
/// are assumed. Files are not required to exist yet.
pub fn resolve_model_spec(
    model_dir: &Path,
    model_id: &str,
    default_dimension: usize,
) -> Result<ModelSpec> {
    let id = normalize_model_id(model_id);
    if id.is_empty() {
        return Err(VectorStoreError::EmbeddingError(
            "embedding model id is empty".to_string(),
        ));
    }
    validate_relative_manifest_path(Path::new(&id))?;
    let base = model_dir.join(&id);

    let manifest_path = model_dir.join("manifest.json");
    if !manifest_path.exists() {
        return Ok(ModelSpec {
            model_path: base.join("model.onnx"),
            tokenizer_path: base.join("tokenizer.json"),
            id,
            dimension: default_dimension,
            max_length: DEFAULT_MAX_LENGTH,
            max_batch: DEFAULT_MAX_BATCH,
        });
    }

    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
        VectorStoreError::EmbeddingError(format!(
            "Failed to read models manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    let manifest: ModelsManifest = serde_json::from_str(&raw).map_err(|e| {
        VectorStoreError::EmbeddingError(format!(
            "Invalid models manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    if manifest.schema_version != 1 {
        return Err(VectorStoreError::EmbeddingError(format!(
            "Unsupported models manifest schema_version {} (expected 1)",
            manifest.schema_version
        )));
    }

    let model = manifest
        .models
        .iter()
        .find(|m| normalize_model_id(&m.id) == id)
        .ok_or_else(|| {
            let available = manifest
                .models
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            VectorStoreError::EmbeddingError(format!(
                "Unknown embedding model id '{id}'. Available: {available}"
            ))
        })?;

    Ok(ModelSpec {
        model_path: asset_path(&base, &id, model.onnx.as_deref(), "model.onnx")?,
        tokenizer_path: asset_path(&base, &id, model.tokenizer.as_deref(), "tokenizer.json")?,
        dimension: model.dimension,
        max_length: model.max_length.unwrap_or(DEFAULT_MAX_LENGTH),
        max_batch: model.max_batch.unwrap_or(DEFAULT_MAX_BATCH).max(1),
        id,
    })
}
