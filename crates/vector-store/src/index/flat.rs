use super::{check_dimension, check_vectors, top_k, IndexBackend, Neighbor, VectorIndex};
use crate::error::{Result, VectorStoreError};
use ndarray::{Array2, ArrayView1, Axis};

/// Exact L2 search over a row-major matrix
pub struct FlatIndex {
    dimension: usize,
    matrix: Array2<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self> {
        check_vectors(dimension, &vectors)?;
        let rows = vectors.len();
        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        let matrix = Array2::from_shape_vec((rows, dimension), flat)
            .map_err(|e| VectorStoreError::IndexError(format!("Matrix shape error: {e}")))?;
        Ok(Self { dimension, matrix })
    }
}

impl VectorIndex for FlatIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Exact
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.matrix.nrows()
    }

    fn vector(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dimension)?;
        self.matrix
            .as_slice()?
            .get(start..start + self.dimension)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension, query.len())?;
        if self.matrix.nrows() == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let query = ArrayView1::from(query);
        let diff = &self.matrix - &query;
        let distances = diff.mapv(|v| v * v).sum_axis(Axis(1)).mapv(f32::sqrt);
        Ok(top_k(distances.iter().copied().enumerate(), k))
    }
}
