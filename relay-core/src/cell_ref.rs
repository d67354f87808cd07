//! References to individual appended cells.
use crate::chunk::ChunkData;
use crate::chunker::{Chunker, ChunkerState};
use crate::error::RelayError;
use crate::tensor::{Dtype, Tensor};
use anyhow::Result;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// A reference to a single cell appended to one column.
///
/// The owning [`Chunker`] keeps the newest `num_keep_alive_refs` references
/// alive in its ring; users receive [`Weak`] handles from
/// `TrajectoryWriter::append` which expire once the ring evicts them. Items
/// upgrade their handles when created, so a pending item keeps its cells
/// alive past eviction.
///
/// Before the containing chunk is sealed the reference resolves against the
/// chunker's staging buffer; sealing atomically switches resolution to the
/// chunk payload without changing the key. `is_ready` is therefore monotone:
/// once `true` it stays `true` for the lifetime of the reference.
pub struct CellRef {
    chunk_key: u64,
    offset: usize,
    episode_id: u64,
    episode_step: u64,
    dtype: Dtype,
    shape: Vec<usize>,
    chunker: Weak<Mutex<ChunkerState>>,
    chunk: RwLock<Option<Arc<ChunkData>>>,
}

impl CellRef {
    pub(crate) fn new(
        chunk_key: u64,
        offset: usize,
        episode_id: u64,
        episode_step: u64,
        dtype: Dtype,
        shape: Vec<usize>,
        chunker: Weak<Mutex<ChunkerState>>,
    ) -> Self {
        Self {
            chunk_key,
            offset,
            episode_id,
            episode_step,
            dtype,
            shape,
            chunker,
            chunk: RwLock::new(None),
        }
    }

    /// Key of the chunk the cell belongs (or will belong) to.
    pub fn chunk_key(&self) -> u64 {
        self.chunk_key
    }

    /// Position of the cell within its chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Episode the cell was appended in.
    pub fn episode_id(&self) -> u64 {
        self.episode_id
    }

    /// Step within the episode the cell was appended at.
    pub fn episode_step(&self) -> u64 {
        self.episode_step
    }

    /// Element type of the cell value.
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Shape of the cell value.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns `true` iff the containing chunk has been sealed.
    pub fn is_ready(&self) -> bool {
        self.chunk.read().unwrap().is_some()
    }

    /// The sealed chunk, or `None` while the cell is still staged.
    pub fn chunk(&self) -> Option<Arc<ChunkData>> {
        self.chunk.read().unwrap().clone()
    }

    /// A handle to the chunker which produced the cell, if it is still alive.
    pub fn chunker(&self) -> Option<Chunker> {
        self.chunker.upgrade().map(Chunker::from_shared)
    }

    /// Materializes the cell value, from the staging buffer or the chunk.
    pub fn data(&self) -> Result<Tensor> {
        if let Some(chunk) = self.chunk.read().unwrap().as_ref() {
            return Ok(chunk.row(self.offset));
        }
        let chunker = self.chunker.upgrade().ok_or_else(|| {
            RelayError::FailedPrecondition(
                "cell data requested after the owning chunker was dropped.".to_string(),
            )
        })?;
        let state = chunker.lock().unwrap();
        // Sealing may have completed while waiting for the chunker lock.
        if let Some(chunk) = self.chunk.read().unwrap().as_ref() {
            return Ok(chunk.row(self.offset));
        }
        state.staged_value(self.chunk_key, self.offset)
    }

    pub(crate) fn set_chunk(&self, chunk: Arc<ChunkData>) {
        *self.chunk.write().unwrap() = Some(chunk);
    }
}
