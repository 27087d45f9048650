use crate::error::{Result, VectorStoreError};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

mod brute_force;
mod flat;

pub use brute_force::BruteForceIndex;
pub use flat::FlatIndex;

/// Nearest-neighbour implementation backing a [`crate::ChunkIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexBackend {
    /// Flat `ndarray` matrix, distances by broadcasting
    #[default]
    Exact,
    /// Row-by-row scan over plain vectors
    BruteForce,
}

impl IndexBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::BruteForce => "brute-force",
        }
    }

    /// Build an index of this kind over `vectors`
    pub fn build(self, dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Box<dyn VectorIndex>> {
        Ok(match self {
            Self::Exact => Box::new(FlatIndex::new(dimension, vectors)?),
            Self::BruteForce => Box::new(BruteForceIndex::new(dimension, vectors)?),
        })
    }
}

impl Display for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexBackend {
    type Err = VectorStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" | "flat" => Ok(Self::Exact),
            "brute-force" | "brute_force" | "bruteforce" => Ok(Self::BruteForce),
            other => Err(VectorStoreError::IndexError(format!(
                "Unknown index backend '{other}' (expected exact or brute-force)"
            ))),
        }
    }
}

/// One search result row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    /// Euclidean distance to the query
    pub distance: f32,
    /// `1 / (1 + distance)`
    pub score: f32,
}

/// Exact nearest-neighbour search over a fixed set of vectors
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> IndexBackend;

    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored vector for `row`
    fn vector(&self, row: usize) -> Option<&[f32]>;

    /// Up to `k` nearest rows, closest first, ties broken by row
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

/// Similarity in `(0, 1]` from an L2 distance
#[must_use]
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

pub(crate) const fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(VectorStoreError::InvalidDimension { expected, actual });
    }
    Ok(())
}

pub(crate) fn check_vectors(dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if dimension == 0 {
        return Err(VectorStoreError::IndexError(
            "index dimension must be > 0".to_string(),
        ));
    }
    for vector in vectors {
        check_dimension(dimension, vector.len())?;
    }
    Ok(())
}

/// Keep the `k` smallest distances
pub(crate) fn top_k(distances: impl Iterator<Item = (usize, f32)>, k: usize) -> Vec<Neighbor> {
    let mut scored: Vec<(usize, f32)> = distances.collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(row, distance)| Neighbor {
            row,
            distance,
            score: similarity_from_distance(distance),
        })
        .collect()
}
