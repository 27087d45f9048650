use serde::{Deserialize, Serialize};

/// A word-bounded slice of a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextChunk {
    /// Position among the chunks emitted for the document (0-indexed)
    pub ordinal: usize,

    /// First word index (inclusive)
    pub start_word: usize,

    /// Last word index (exclusive)
    pub end_word: usize,

    /// Window words joined by single spaces
    pub text: String,
}

impl TextChunk {
    /// Number of words in this chunk
    #[must_use]
    pub const fn word_count(&self) -> usize {
        self.end_word.saturating_sub(self.start_word)
    }

    /// Check if chunk covers a word index
    #[must_use]
    pub const fn contains_word(&self, index: usize) -> bool {
        index >= self.start_word && index < self.end_word
    }
}
