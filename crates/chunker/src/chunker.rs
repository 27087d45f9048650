use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::types::TextChunk;

/// Main chunker interface for splitting documents into overlapping word windows
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker, rejecting configurations with a non-positive stride
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily iterate over the chunks of `text`.
    ///
    /// The iterator is finite and `Clone`; calling `chunks` again restarts from the first window.
    #[must_use]
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        let words: Vec<&'a str> = text.split_whitespace().collect();
        let next_start = (!words.is_empty()).then_some(0);
        Chunks {
            words,
            config: self.config,
            next_start,
            ordinal: 0,
        }
    }

    /// Chunk a document and collect the chunk texts
    #[must_use]
    pub fn chunk_str(&self, text: &str) -> Vec<String> {
        self.chunks(text).map(|chunk| chunk.text).collect()
    }
}

/// Iterator over the word windows of one document
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    words: Vec<&'a str>,
    config: ChunkerConfig,
    next_start: Option<usize>,
    ordinal: usize,
}

impl Chunks<'_> {
    /// Total number of words in the document
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    fn advance(&self, start: usize) -> Option<usize> {
        let total = self.words.len();
        if total <= self.config.chunk_size {
            return None;
        }
        let next = start + self.config.stride();
        (next < total - self.config.overlap).then_some(next)
    }
}

impl Iterator for Chunks<'_> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.next_start?;
            let end = (start + self.config.chunk_size).min(self.words.len());
            self.next_start = self.advance(start);

            if end - start < self.config.min_chunk_length {
                log::trace!("dropping {}-word window at {start}", end - start);
                continue;
            }

            let chunk = TextChunk {
                ordinal: self.ordinal,
                start_word: start,
                end_word: end,
                text: self.words[start..end].join(" "),
            };
            self.ordinal += 1;
            return Some(chunk);
        }
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn make_chunker(chunk_size: usize, overlap: usize, min_chunk_length: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size,
            overlap,
            min_chunk_length,
        })
        .unwrap()
    }

    #[test]
    fn test_short_document_below_minimum_yields_nothing() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        assert!(chunker.chunk_str(&words(49)).is_empty());
        assert!(chunker.chunk_str("").is_empty());
        assert!(chunker.chunk_str("   \n\t ").is_empty());
    }

    #[test]
    fn test_document_at_minimum_yields_one_chunk() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let chunks: Vec<_> = chunker.chunks(&words(50)).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count(), 50);
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn test_document_at_chunk_size_is_single_chunk() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let chunks: Vec<_> = chunker.chunks(&words(512)).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_word, chunks[0].end_word), (0, 512));
    }

    #[test]
    fn test_six_hundred_words_yield_two_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let chunks: Vec<_> = chunker.chunks(&words(600)).collect();
        let ranges: Vec<_> = chunks.iter().map(|c| (c.start_word, c.end_word)).collect();
        assert_eq!(ranges, vec![(0, 512), (448, 600)]);
        assert_eq!(chunks[1].word_count(), 152);
        assert!(chunks[1].text.starts_with("w448 "));
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let chunker = make_chunker(4, 1, 1);
        let chunks = chunker.chunk_str("a  b\n\nc\td e");
        assert_eq!(chunks, vec!["a b c d".to_string(), "d e".to_string()]);
    }

    #[test]
    fn test_windows_cover_document_with_exact_overlap() {
        for (size, overlap, total) in [(10, 3, 57), (8, 0, 33), (16, 15, 40), (5, 2, 6)] {
            let chunker = make_chunker(size, overlap, 1);
            let chunks: Vec<_> = chunker.chunks(&words(total)).collect();

            assert_eq!(chunks.first().map(|c| c.start_word), Some(0));
            assert_eq!(chunks.last().map(|c| c.end_word), Some(total));
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end_word - pair[1].start_word, overlap);
                assert_eq!(pair[0].word_count(), size);
            }
            for index in 0..total {
                assert!(
                    chunks.iter().any(|c| c.contains_word(index)),
                    "word {index} uncovered for size={size} overlap={overlap}"
                );
            }
        }
    }

    #[test]
    fn test_short_windows_are_dropped_but_ordinals_stay_dense() {
        // stride 6: windows at 0 and 6, the tail window has only 4 words
        let chunker = make_chunker(8, 2, 5);
        let chunks: Vec<_> = chunker.chunks(&words(10)).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);

        let chunker = make_chunker(8, 2, 3);
        let ordinals: Vec<_> = chunker.chunks(&words(20)).map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let chunker = make_chunker(10, 2, 1);
        let text = words(45);
        let first: Vec<_> = chunker.chunks(&text).collect();
        let mut iter = chunker.chunks(&text);
        let _ = iter.next();
        let rest: Vec<_> = iter.clone().collect();
        assert_eq!(rest, first[1..].to_vec());
        assert_eq!(chunker.chunks(&text).collect::<Vec<_>>(), first);
    }

    #[test]
    fn test_invalid_overlap_fails_fast() {
        let err = Chunker::new(ChunkerConfig {
            chunk_size: 10,
            overlap: 10,
            min_chunk_length: 1,
        })
        .unwrap_err();
        assert!(matches!(err, crate::ChunkerError::InvalidConfig(_)));
    }
}
