//! Messages exchanged with the replay service over an insert stream.
use relay_core::{CellRef, ChunkData};
use std::sync::Arc;

/// A client to server message on the insert stream.
#[derive(Clone, Debug)]
pub enum InsertRequest {
    /// A sealed chunk. Always sent before the first item referencing it.
    Chunk(Arc<ChunkData>),
    /// An item referencing previously sent chunks.
    Item(ItemData),
}

impl InsertRequest {
    /// Returns `true` if the message carries a chunk.
    pub fn is_chunk(&self) -> bool {
        matches!(self, InsertRequest::Chunk(_))
    }

    /// The item payload, if the message carries one.
    pub fn as_item(&self) -> Option<&ItemData> {
        match self {
            InsertRequest::Item(item) => Some(item),
            InsertRequest::Chunk(_) => None,
        }
    }

    /// The chunk payload, if the message carries one.
    pub fn as_chunk(&self) -> Option<&Arc<ChunkData>> {
        match self {
            InsertRequest::Chunk(chunk) => Some(chunk),
            InsertRequest::Item(_) => None,
        }
    }
}

/// The wire form of an item.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemData {
    /// Client minted item key, echoed back by the server on confirmation.
    pub key: u64,
    /// Destination table.
    pub table: String,
    /// Sampling priority of the item.
    pub priority: f64,
    /// The trajectory, one entry per column, flattened into chunk slices.
    pub columns: Vec<FlatColumn>,
    /// Chunks the server must keep around for future items of this writer.
    pub keep_chunk_keys: Vec<u64>,
    /// Whether the server must confirm the insertion.
    pub send_confirmation: bool,
}

/// One trajectory column flattened into chunk slices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatColumn {
    /// Maximal contiguous runs of cells, in trajectory order.
    pub slices: Vec<ColumnSlice>,
    /// Whether the column is squeezed to a single cell.
    pub squeeze: bool,
}

impl FlatColumn {
    /// Flattens `cells` into maximal contiguous slices, preserving order.
    pub fn from_refs(cells: &[Arc<CellRef>], squeeze: bool) -> Self {
        let mut slices: Vec<ColumnSlice> = Vec::new();
        for cell in cells {
            match slices.last_mut() {
                Some(s)
                    if s.chunk_key == cell.chunk_key()
                        && cell.offset() == s.offset + s.length =>
                {
                    s.length += 1;
                }
                _ => slices.push(ColumnSlice {
                    chunk_key: cell.chunk_key(),
                    offset: cell.offset(),
                    length: 1,
                }),
            }
        }
        Self { slices, squeeze }
    }

    /// Keys of the chunks the column references, deduplicated.
    pub fn chunk_keys(&self) -> Vec<u64> {
        let mut keys = Vec::new();
        for s in &self.slices {
            if !keys.contains(&s.chunk_key) {
                keys.push(s.chunk_key);
            }
        }
        keys
    }
}

/// A contiguous run of cells within a single chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSlice {
    /// Key of the chunk holding the cells.
    pub chunk_key: u64,
    /// Offset of the first cell within the chunk.
    pub offset: usize,
    /// Number of consecutive cells.
    pub length: usize,
}
