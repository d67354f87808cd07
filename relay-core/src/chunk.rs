//! Finalized batches of consecutive cells.
use crate::tensor::{Dtype, Tensor};

/// Inclusive episode step range covered by a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceRange {
    /// Episode the cells belong to.
    pub episode_id: u64,
    /// Step of the first cell.
    pub start: u64,
    /// Step of the last cell.
    pub end: u64,
    /// `true` iff the steps are non consecutive.
    pub sparse: bool,
}

impl SequenceRange {
    /// Builds the range spanned by `steps`, which must be non empty and
    /// strictly increasing.
    pub fn new(episode_id: u64, steps: &[u64]) -> Self {
        assert!(!steps.is_empty());
        let start = steps[0];
        let end = steps[steps.len() - 1];
        Self {
            episode_id,
            start,
            end,
            sparse: (end - start + 1) as usize != steps.len(),
        }
    }
}

/// An immutable batch of consecutive cells of one column.
///
/// A chunk is created when a [`Chunker`](crate::chunker::Chunker) seals its
/// staging buffer and is never mutated afterwards. It is shared by reference
/// count between the keep alive ring, pending items and in flight stream
/// messages. The key is unique per process and is used by the server for
/// deduplication.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkData {
    key: u64,
    sequence_range: SequenceRange,
    column: usize,
    data: Tensor,
}

impl ChunkData {
    pub(crate) fn new(key: u64, sequence_range: SequenceRange, column: usize, data: Tensor) -> Self {
        Self {
            key,
            sequence_range,
            column,
            data,
        }
    }

    /// Unique key of the chunk.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Episode and step range of the batched cells.
    pub fn sequence_range(&self) -> SequenceRange {
        self.sequence_range
    }

    /// Index of the column the chunk was produced by.
    pub fn column(&self) -> usize {
        self.column
    }

    /// Element type of the payload.
    pub fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    /// Number of cells in the batch.
    pub fn num_rows(&self) -> usize {
        self.data.shape()[0]
    }

    /// The batched payload, shaped `[num_rows, ..cell shape]`.
    pub fn data(&self) -> &Tensor {
        &self.data
    }

    /// Extracts the cell stored at `offset`.
    pub fn row(&self, offset: usize) -> Tensor {
        self.data.row(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_steps_are_dense() {
        let range = SequenceRange::new(1, &[3, 4, 5]);
        assert_eq!(range.start, 3);
        assert_eq!(range.end, 5);
        assert!(!range.sparse);
    }

    #[test]
    fn gapped_steps_are_sparse() {
        let range = SequenceRange::new(1, &[0, 2, 4]);
        assert_eq!(range.end, 4);
        assert!(range.sparse);
    }

    #[test]
    fn single_step_is_dense() {
        assert!(!SequenceRange::new(1, &[7]).sparse);
    }
}
