use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque key-value metadata attached to documents and passed through to their chunks.
///
/// Conventional keys (`source_file`, `session_id`, ...) are never interpreted here.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One row of an index's chunk table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub document_id: String,
    pub title: String,
    pub chunk_ordinal: usize,
    #[serde(default)]
    pub user_metadata: Metadata,
    pub chunk_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub chunk: ChunkRecord,
    /// `1 / (1 + distance)`, in (0, 1]
    pub score: f32,
    pub distance: f32,
}
