//! Configuration of a [`Chunker`](super::Chunker).
use crate::error::RelayError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Chunking and retention parameters of a single column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Number of cells batched into one chunk before it is sealed
    /// automatically.
    pub max_chunk_length: usize,

    /// Size of the ring of recent cell references kept alive so that items
    /// can still reference them after the chunk is sealed. Must be at least
    /// `max_chunk_length`; it bounds the number of steps a trajectory can
    /// span within the column.
    pub num_keep_alive_refs: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: 1,
            num_keep_alive_refs: 1,
        }
    }
}

impl ChunkerConfig {
    /// Builds a config with the given parameters.
    pub fn new(max_chunk_length: usize, num_keep_alive_refs: usize) -> Self {
        Self {
            max_chunk_length,
            num_keep_alive_refs,
        }
    }

    /// Sets the number of cells batched into one chunk.
    pub fn max_chunk_length(mut self, max_chunk_length: usize) -> Self {
        self.max_chunk_length = max_chunk_length;
        self
    }

    /// Sets the size of the keep alive ring.
    pub fn num_keep_alive_refs(mut self, num_keep_alive_refs: usize) -> Self {
        self.num_keep_alive_refs = num_keep_alive_refs;
        self
    }

    /// Checks the parameter constraints.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_length == 0 {
            return Err(RelayError::InvalidArgument(
                "max_chunk_length must be > 0 but got 0.".to_string(),
            )
            .into());
        }
        if self.num_keep_alive_refs == 0 {
            return Err(RelayError::InvalidArgument(
                "num_keep_alive_refs must be > 0 but got 0.".to_string(),
            )
            .into());
        }
        if self.num_keep_alive_refs < self.max_chunk_length {
            return Err(RelayError::InvalidArgument(format!(
                "num_keep_alive_refs ({}) must be >= max_chunk_length ({}).",
                self.num_keep_alive_refs, self.max_chunk_length
            ))
            .into());
        }
        Ok(())
    }
}
