//! Binary layout of `vectors.bin`: magic, u32 dimension, u32 row count, then
//! `count * dimension` little-endian f32 values.

use crate::error::{Result, VectorStoreError};

const VECTORS_MAGIC: &[u8; 4] = b"CKV1";
const HEADER_LEN: usize = 12;
const ARTIFACT: &str = "vectors.bin";

pub(crate) fn encode_vectors<V: AsRef<[f32]>>(dimension: usize, vectors: &[V]) -> Result<Vec<u8>> {
    let dim = u32::try_from(dimension)
        .map_err(|_| VectorStoreError::IndexError(format!("dimension {dimension} too large")))?;
    let count = u32::try_from(vectors.len()).map_err(|_| {
        VectorStoreError::IndexError(format!("{} vectors exceed u32 range", vectors.len()))
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + vectors.len() * dimension * 4);
    out.extend_from_slice(VECTORS_MAGIC);
    out.extend_from_slice(&dim.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    for vector in vectors {
        let vector = vector.as_ref();
        if vector.len() != dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: dimension,
                actual: vector.len(),
            });
        }
        for v in vector {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    Ok(out)
}

/// Decode rows, returning `(dimension, vectors)`
pub(crate) fn decode_vectors(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>)> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != VECTORS_MAGIC {
        return Err(VectorStoreError::corrupt(ARTIFACT, "missing CKV1 header"));
    }
    let dim = read_u32(&bytes[4..8])? as usize;
    let count = read_u32(&bytes[8..12])? as usize;

    let expected_len = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| VectorStoreError::corrupt(ARTIFACT, "header sizes overflow"))?;
    if bytes.len() != expected_len {
        return Err(VectorStoreError::corrupt(
            ARTIFACT,
            format!(
                "expected {expected_len} bytes for {count}x{dim}, found {}",
                bytes.len()
            ),
        ));
    }

    let vectors = bytes[HEADER_LEN..]
        .chunks_exact(dim.max(1) * 4)
        .take(count)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        })
        .collect();
    Ok((dim, vectors))
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| VectorStoreError::corrupt(ARTIFACT, "truncated header"))?;
    Ok(u32::from_le_bytes(raw))
}
