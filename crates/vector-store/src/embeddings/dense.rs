use super::{EmbeddingKind, EmbeddingProvider};
use crate::error::{Result, VectorStoreError};
use crate::models::ModelSpec;
use async_trait::async_trait;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Dimension, Ix2, Ix3, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor, ValueType};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

fn fail<E: Display>(context: &'static str) -> impl FnOnce(E) -> VectorStoreError {
    move |err| VectorStoreError::EmbeddingError(format!("{context}: {err}"))
}

/// Integer inputs of one tokenized group, zero-padded to the longest text
struct TokenBatch {
    input_ids: Array2<i64>,
    attention_mask: Array2<i64>,
    token_type_ids: Array2<i64>,
}

impl TokenBatch {
    fn new(encodings: &[Encoding], max_length: usize) -> Result<Self> {
        let width = encodings.iter().map(Encoding::len).max().unwrap_or(0);
        if width > max_length {
            return Err(VectorStoreError::EmbeddingError(format!(
                "tokenized length {width} exceeds max_length {max_length}"
            )));
        }
        let column = |pick: fn(&Encoding) -> &[u32]| {
            Array2::from_shape_fn((encodings.len(), width), |(row, col)| {
                pick(&encodings[row]).get(col).map_or(0, |v| i64::from(*v))
            })
        };
        Ok(Self {
            input_ids: column(Encoding::get_ids),
            attention_mask: column(Encoding::get_attention_mask),
            token_type_ids: column(Encoding::get_type_ids),
        })
    }

    /// One tensor per graph input. Inputs the tokenizer does not produce get zeros.
    fn into_feed(self, inputs: &[Input]) -> Result<HashMap<String, DynTensor>> {
        let shape = self.input_ids.raw_dim().into_dyn();
        let mut produced = HashMap::from([
            ("input_ids", self.input_ids),
            ("attention_mask", self.attention_mask),
            ("token_type_ids", self.token_type_ids),
        ]);
        inputs
            .iter()
            .map(|input| {
                let tensor = match produced.remove(input.name.as_str()) {
                    Some(values) => Tensor::from_array(values.into_dyn())
                        .map_err(fail("build input tensor"))?
                        .upcast(),
                    None => zeros_for(input, &shape)?,
                };
                Ok::<_, VectorStoreError>((input.name.clone(), tensor))
            })
            .collect()
    }
}

fn zeros_for(input: &Input, shape: &IxDyn) -> Result<DynTensor> {
    let ValueType::Tensor { ty, .. } = &input.input_type else {
        return Err(VectorStoreError::EmbeddingError(format!(
            "ONNX input '{}' is not a tensor",
            input.name
        )));
    };
    let tensor = match ty {
        TensorElementType::Int64 => Tensor::from_array(ArrayD::<i64>::zeros(shape.clone()))
            .map_err(fail("build zero input"))?
            .upcast(),
        TensorElementType::Float32 => Tensor::from_array(ArrayD::<f32>::zeros(shape.clone()))
            .map_err(fail("build zero input"))?
            .upcast(),
        other => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "no zero fill for ONNX input '{}' of type {other:?}",
                input.name
            )))
        }
    };
    Ok(tensor)
}

/// Average of the token rows whose mask is set
fn mean_pool(tokens: ArrayView2<'_, f32>, mask: ArrayView1<'_, i64>) -> Vec<f32> {
    let weights: Array1<f32> = (0..tokens.nrows())
        .map(|i| match mask.get(i) {
            Some(bit) if *bit != 0 => 1.0,
            _ => 0.0,
        })
        .collect();
    let count = weights.sum();
    if count == 0.0 {
        return vec![0.0; tokens.ncols()];
    }
    (tokens.t().dot(&weights) / count).to_vec()
}

/// Sentence vectors from a model output: `[batch, dim]` as is, `[batch, tokens, dim]` mean-pooled
fn pool(output: ArrayD<f32>, mask: &Array2<i64>, dimension: usize) -> Result<Vec<Vec<f32>>> {
    let vectors: Vec<Vec<f32>> = match output.ndim() {
        2 => output
            .into_dimensionality::<Ix2>()
            .map_err(fail("ONNX output shape"))?
            .outer_iter()
            .map(|row| row.to_vec())
            .collect(),
        3 => {
            let hidden = output
                .into_dimensionality::<Ix3>()
                .map_err(fail("ONNX output shape"))?;
            hidden
                .outer_iter()
                .zip(mask.outer_iter())
                .map(|(tokens, row_mask)| mean_pool(tokens, row_mask))
                .collect()
        }
        _ => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "unexpected ONNX output shape {:?}",
                output.shape()
            )))
        }
    };
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(VectorStoreError::InvalidDimension {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

fn load_tokenizer(spec: &ModelSpec) -> Result<Tokenizer> {
    // Single-threaded unless TOKENIZERS_PARALLELISM says otherwise
    if !tokenizers::utils::parallelism::is_parallelism_configured() {
        tokenizers::utils::parallelism::set_parallelism(false);
    }
    let mut tokenizer = Tokenizer::from_file(&spec.tokenizer_path).map_err(fail("load tokenizer"))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..PaddingParams::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: spec.max_length,
            ..TruncationParams::default()
        }))
        .map_err(fail("configure truncation"))?;
    Ok(tokenizer)
}

fn open_session(model_path: &Path) -> Result<Session> {
    let threads = std::thread::available_parallelism().map_or(1, |n| (n.get() / 4).clamp(1, 4));
    let session = Session::builder()
        .map_err(fail("create ONNX session"))?
        .with_intra_threads(threads)
        .map_err(fail("set ONNX threads"))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(fail("set ONNX optimization level"))?
        .commit_from_file(model_path)
        .map_err(fail("load ONNX model"))?;
    Ok(session)
}

struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    max_batch: usize,
    dimension: usize,
}

impl OnnxModel {
    fn load(spec: &ModelSpec) -> Result<Self> {
        if !spec.files_present() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "model files for '{}' are missing: expected {} and {}",
                spec.id,
                spec.model_path.display(),
                spec.tokenizer_path.display(),
            )));
        }
        let model = Self {
            tokenizer: load_tokenizer(spec)?,
            session: Mutex::new(open_session(&spec.model_path)?),
            max_length: spec.max_length,
            max_batch: spec.max_batch.max(1),
            dimension: spec.dimension,
        };
        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            spec.id,
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );
        Ok(model)
    }

    fn forward(&self, batch: TokenBatch) -> Result<ArrayD<f32>> {
        let mut session = self.session.lock().map_err(|_| {
            VectorStoreError::EmbeddingError("ONNX session lock poisoned".to_string())
        })?;
        let feed = batch.into_feed(&session.inputs)?;
        let outputs = session
            .run(SessionInputs::from(feed))
            .map_err(fail("ONNX forward"))?;
        if outputs.len() == 0 {
            return Err(VectorStoreError::EmbeddingError(
                "ONNX model produced no outputs".to_string(),
            ));
        }
        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(fail("read ONNX output"))?
            .to_owned();
        Ok(output)
    }

    fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(group.to_vec(), true)
                .map_err(fail("tokenize"))?;
            let batch = TokenBatch::new(&encodings, self.max_length)?;
            let mask = batch.attention_mask.clone();
            let output = self.forward(batch)?;
            vectors.extend(pool(output, &mask, self.dimension)?);
        }
        Ok(vectors)
    }
}

/// Sentence encoder on ONNX Runtime with mask-aware mean pooling
#[derive(Clone)]
pub struct DenseEncoder {
    model: Arc<OnnxModel>,
    model_id: String,
}

impl DenseEncoder {
    /// Load the model described by `spec`. Fails if files are missing or unloadable.
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        Ok(Self {
            model: Arc::new(OnnxModel::load(spec)?),
            model_id: spec.id.clone(),
        })
    }
}

impl std::fmt::Debug for DenseEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseEncoder")
            .field("model_id", &self.model_id)
            .field("dimension", &self.model.dimension)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EmbeddingProvider for DenseEncoder {
    fn kind(&self) -> EmbeddingKind {
        EmbeddingKind::Dense
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.model.dimension
    }

    fn batch_hint(&self) -> usize {
        self.model.max_batch
    }

    async fn try_embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed_blocking(&texts))
            .await
            .map_err(fail("embedding task"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resolve_model_spec;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mean_pool_ignores_padding() {
        let tokens = array![[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]];
        let mask = array![1i64, 1, 0];
        assert_eq!(mean_pool(tokens.view(), mask.view()), vec![2.0, 3.0]);
    }

    #[test]
    fn test_mean_pool_all_masked_is_zero() {
        let tokens = array![[1.0f32, 2.0]];
        let mask = array![0i64];
        assert_eq!(mean_pool(tokens.view(), mask.view()), vec![0.0, 0.0]);
    }

    #[test]
    fn test_pooled_output_is_not_normalised() {
        let hidden = array![[[3.0f32, 4.0], [3.0, 4.0]]].into_dyn();
        let out = pool(hidden, &array![[1i64, 1]], 2).unwrap();
        assert_eq!(out, vec![vec![3.0, 4.0]]);
    }

    #[test]
    fn test_two_dimensional_output_passes_through() {
        let no_mask = Array2::<i64>::zeros((0, 0));
        let pooled = array![[0.5f32, 0.25, 0.0], [1.0, 1.0, 1.0]].into_dyn();
        assert_eq!(pool(pooled, &no_mask, 3).unwrap().len(), 2);

        let narrow = array![[0.5f32, 0.25]].into_dyn();
        let err = pool(narrow, &no_mask, 3).unwrap_err();
        assert!(
            matches!(err, VectorStoreError::InvalidDimension { expected: 3, actual: 2 }),
            "{err}"
        );
    }

    #[test]
    fn test_missing_model_files_fail_to_load() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = resolve_model_spec(tmp.path(), "all-minilm-l6-v2", 384).unwrap();
        let err = DenseEncoder::load(&spec).unwrap_err();
        assert!(err.to_string().contains("missing"), "{err}");
    }

    #[tokio::test]
    #[ignore = "Requires ONNX model files in the default model dir"]
    async fn test_dense_encoder_embeds_with_model_dimension() {
        let spec = resolve_model_spec(
            &crate::models::default_model_dir(),
            crate::models::DEFAULT_MODEL_ID,
            384,
        )
        .unwrap();
        let encoder = DenseEncoder::load(&spec).unwrap();
        let texts = vec![
            "Cells were passaged at 80% confluence".to_string(),
            "PCR failed".to_string(),
        ];
        let batch = encoder.embed(&texts).await;
        assert_eq!(batch.degraded, 0);
        assert!(batch.vectors.iter().all(|v| v.len() == 384));
    }
}
