//! # Cycle Chunker
//!
//! Word-window chunking of knowledge-base documents for embedding.
//!
//! ## Windowing
//!
//! ```text
//! Document text
//!     │
//!     ├──> Whitespace tokenization → words[0..N)
//!     │
//!     ├──> N <= chunk_size ?
//!     │      └─> single chunk (if N >= min_chunk_length)
//!     │
//!     └──> Sliding window, stride = chunk_size - overlap
//!            ├─> window = words[start .. start + chunk_size]
//!            ├─> stop once the tail is covered by the overlap
//!            └─> drop windows shorter than min_chunk_length
//! ```
//!
//! ## Example
//!
//! ```rust
//! use cycle_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let text = "word ".repeat(600);
//!
//! let chunks: Vec<_> = chunker.chunks(&text).collect();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].word_count(), 512);
//! assert_eq!(chunks[1].start_word, 448);
//! ```

mod chunker;
mod config;
mod error;
mod types;

pub use chunker::{Chunker, Chunks};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use types::TextChunk;
