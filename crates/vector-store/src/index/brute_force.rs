use super::{check_dimension, check_vectors, top_k, IndexBackend, Neighbor, VectorIndex};
use crate::error::Result;

/// Linear scan over owned vectors
pub struct BruteForceIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl BruteForceIndex {
    pub fn new(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self> {
        check_vectors(dimension, &vectors)?;
        Ok(Self { dimension, vectors })
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

impl VectorIndex for BruteForceIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::BruteForce
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn vector(&self, row: usize) -> Option<&[f32]> {
        self.vectors.get(row).map(Vec::as_slice)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension, query.len())?;
        let distances = self
            .vectors
            .iter()
            .enumerate()
            .map(|(row, vector)| (row, l2_distance(vector, query)));
        Ok(top_k(distances, k))
    }
}
