use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for word-window chunking. All sizes are in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Target window length
    pub chunk_size: usize,

    /// Words shared between consecutive windows
    pub overlap: usize,

    /// Windows with fewer words are dropped
    pub min_chunk_length: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 64,
            min_chunk_length: 50,
        }
    }
}

impl ChunkerConfig {
    /// Window stride. Only meaningful for a validated config.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ChunkerError::invalid_config("chunk_size must be > 0"));
        }

        if self.overlap >= self.chunk_size {
            return Err(ChunkerError::invalid_config(format!(
                "overlap ({}) must be less than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }

        if self.min_chunk_length > self.chunk_size {
            return Err(ChunkerError::invalid_config(format!(
                "min_chunk_length ({}) cannot exceed chunk_size ({})",
                self.min_chunk_length, self.chunk_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ChunkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stride(), 448);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ChunkerConfig::default();

        // Invalid: overlap == chunk_size gives a zero stride
        config.overlap = 512;
        assert!(config.validate().is_err());

        // Invalid: overlap > chunk_size
        config.overlap = 600;
        assert!(config.validate().is_err());

        // Invalid: chunk_size = 0
        config = ChunkerConfig {
            chunk_size: 0,
            overlap: 0,
            min_chunk_length: 0,
        };
        assert!(config.validate().is_err());

        // Invalid: min > chunk_size
        config = ChunkerConfig {
            chunk_size: 40,
            overlap: 4,
            min_chunk_length: 50,
        };
        assert!(config.validate().is_err());

        // Valid configuration
        config.min_chunk_length = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_message_names_fields() {
        let config = ChunkerConfig {
            chunk_size: 64,
            overlap: 64,
            min_chunk_length: 1,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlap (64)"), "{err}");
    }
}
