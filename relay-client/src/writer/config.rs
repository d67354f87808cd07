//! Configuration of [`TrajectoryWriter`](super::TrajectoryWriter).
use anyhow::Result;
use relay_core::ChunkerConfig;
use serde::{Deserialize, Serialize};

/// Configuration of [`TrajectoryWriter`](super::TrajectoryWriter).
///
/// The two parameters are the defaults applied to every column; individual
/// columns can be overridden with
/// [`TrajectoryWriter::configure_chunker`](super::TrajectoryWriter::configure_chunker).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryWriterConfig {
    /// Default number of cells batched into one chunk, per column.
    pub max_chunk_length: usize,

    /// Default size of the per column keep alive ring.
    pub num_keep_alive_refs: usize,
}

impl Default for TrajectoryWriterConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: 1,
            num_keep_alive_refs: 1,
        }
    }
}

impl TrajectoryWriterConfig {
    /// Builds a config with the given defaults.
    pub fn new(max_chunk_length: usize, num_keep_alive_refs: usize) -> Self {
        Self {
            max_chunk_length,
            num_keep_alive_refs,
        }
    }

    /// Sets the default number of cells batched into one chunk.
    pub fn max_chunk_length(mut self, max_chunk_length: usize) -> Self {
        self.max_chunk_length = max_chunk_length;
        self
    }

    /// Sets the default size of the keep alive ring.
    pub fn num_keep_alive_refs(mut self, num_keep_alive_refs: usize) -> Self {
        self.num_keep_alive_refs = num_keep_alive_refs;
        self
    }

    /// The per column config applied to columns without an override.
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig::new(self.max_chunk_length, self.num_keep_alive_refs)
    }

    /// Checks the parameter constraints.
    pub fn validate(&self) -> Result<()> {
        self.chunker_config().validate()
    }
}
