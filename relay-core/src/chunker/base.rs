use super::ChunkerConfig;
use crate::cell_ref::CellRef;
use crate::chunk::{ChunkData, SequenceRange};
use crate::error::RelayError;
use crate::key::new_key;
use crate::tensor::{Tensor, TensorSpec};
use anyhow::Result;
use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

/// Per column staging buffer producing [`ChunkData`] batches.
///
/// Appended values are staged until `max_chunk_length` cells have
/// accumulated or [`Chunker::flush`] is called, at which point the staged
/// cells are sealed into an immutable chunk and the references handed out by
/// [`Chunker::append`] switch to resolving against the chunk payload.
///
/// Cloning a `Chunker` yields another handle to the same column state; the
/// writer shares handles with its stream worker this way. All operations
/// serialize on an internal mutex.
#[derive(Clone)]
pub struct Chunker {
    inner: Arc<Mutex<ChunkerState>>,
}

pub(crate) struct ChunkerState {
    spec: TensorSpec,
    column: usize,
    config: ChunkerConfig,
    /// Values of the cells staged for the next chunk.
    buffer: Vec<Tensor>,
    /// References into `buffer`, in append order.
    staged: Vec<Arc<CellRef>>,
    /// Keep alive ring over the most recent references, staged and sealed.
    ring: VecDeque<Arc<CellRef>>,
    /// Key assigned to the chunk currently being staged.
    active_chunk_key: u64,
}

impl ChunkerState {
    fn seal(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let episode_id = self.staged[0].episode_id();
        let steps: Vec<u64> = self.staged.iter().map(|r| r.episode_step()).collect();
        let values = std::mem::take(&mut self.buffer);
        let batched = Tensor::stack(&values)?;
        let chunk = Arc::new(ChunkData::new(
            self.active_chunk_key,
            SequenceRange::new(episode_id, &steps),
            self.column,
            batched,
        ));
        trace!(
            "column {}: sealed chunk {:016x} covering steps {}..={} of episode {:016x}",
            self.column,
            chunk.key(),
            chunk.sequence_range().start,
            chunk.sequence_range().end,
            episode_id
        );
        for r in self.staged.drain(..) {
            r.set_chunk(chunk.clone());
        }
        self.active_chunk_key = new_key();
        Ok(())
    }

    /// Reads a still staged value. Fails if the staging buffer has moved on,
    /// which can only happen when the reference outlived a reset.
    pub(crate) fn staged_value(&self, chunk_key: u64, offset: usize) -> Result<Tensor> {
        if chunk_key != self.active_chunk_key || offset >= self.buffer.len() {
            return Err(RelayError::FailedPrecondition(
                "cell is no longer present in the staging buffer.".to_string(),
            )
            .into());
        }
        Ok(self.buffer[offset].clone())
    }
}

impl Chunker {
    /// Builds a chunker for `column` accepting values matching `spec`.
    ///
    /// `config` is assumed to have been validated by the caller.
    pub fn new(column: usize, spec: TensorSpec, config: ChunkerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChunkerState {
                spec,
                column,
                config,
                buffer: Vec::new(),
                staged: Vec::new(),
                ring: VecDeque::new(),
                active_chunk_key: new_key(),
            })),
        }
    }

    pub(crate) fn from_shared(inner: Arc<Mutex<ChunkerState>>) -> Self {
        Self { inner }
    }

    /// Index of the column this chunker stages.
    pub fn column(&self) -> usize {
        self.inner.lock().unwrap().column
    }

    /// The spec appended values are validated against.
    pub fn spec(&self) -> TensorSpec {
        self.inner.lock().unwrap().spec.clone()
    }

    /// Stages `value` as the cell at `(episode_id, episode_step)`.
    ///
    /// Seals the staging buffer automatically once it holds
    /// `max_chunk_length` cells. The returned handle expires when the cell is
    /// evicted from the keep alive ring.
    pub fn append(
        &self,
        value: Tensor,
        episode_id: u64,
        episode_step: u64,
    ) -> Result<Weak<CellRef>> {
        let mut state = self.inner.lock().unwrap();
        state.spec.validate(&value)?;
        if !state.staged.is_empty() && state.staged[0].episode_id() != episode_id {
            return Err(RelayError::FailedPrecondition(
                "append called with new episode when buffer non empty.".to_string(),
            )
            .into());
        }
        if let Some(last) = state.ring.back() {
            if last.episode_id() == episode_id && last.episode_step() >= episode_step {
                return Err(RelayError::FailedPrecondition(
                    "append called with an episode step which was not greater than already observed."
                        .to_string(),
                )
                .into());
            }
        }

        let cell = Arc::new(CellRef::new(
            state.active_chunk_key,
            state.buffer.len(),
            episode_id,
            episode_step,
            value.dtype(),
            value.shape().to_vec(),
            Arc::downgrade(&self.inner),
        ));
        let handle = Arc::downgrade(&cell);
        state.buffer.push(value);
        state.staged.push(cell.clone());
        state.ring.push_back(cell);
        while state.ring.len() > state.config.num_keep_alive_refs {
            state.ring.pop_front();
        }
        if state.buffer.len() >= state.config.max_chunk_length {
            state.seal()?;
        }
        Ok(handle)
    }

    /// Seals the staged cells into a chunk. No-op when nothing is staged.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().unwrap().seal()
    }

    /// Drops the staging buffer and the keep alive ring, expiring every
    /// outstanding reference, and mints a fresh chunk key.
    pub fn reset(&self) {
        let mut state = self.inner.lock().unwrap();
        state.buffer.clear();
        state.staged.clear();
        state.ring.clear();
        state.active_chunk_key = new_key();
    }

    /// Replaces the chunking parameters.
    ///
    /// The staging buffer must be empty; shrinking the ring evicts the oldest
    /// references immediately.
    pub fn apply_config(&self, config: ChunkerConfig) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if !state.buffer.is_empty() {
            return Err(RelayError::FailedPrecondition(
                "flush must be called before apply_config.".to_string(),
            )
            .into());
        }
        config.validate()?;
        state.config = config;
        while state.ring.len() > state.config.num_keep_alive_refs {
            state.ring.pop_front();
        }
        Ok(())
    }

    /// Chunk keys of every reference in the keep alive ring, oldest first,
    /// deduplicated. Includes the key of the chunk being staged whenever the
    /// staging buffer is non empty.
    pub fn keep_keys(&self) -> Vec<u64> {
        let state = self.inner.lock().unwrap();
        let mut keys: Vec<u64> = Vec::new();
        for r in &state.ring {
            if !keys.contains(&r.chunk_key()) {
                keys.push(r.chunk_key());
            }
        }
        keys
    }
}
