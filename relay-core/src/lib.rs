#![warn(missing_docs)]
//! Core building blocks for streaming experience trajectories to a replay
//! service.
//!
//! # Cells, chunks and references
//!
//! As an agent runs an episode, every value appended to a column becomes a
//! *cell* at a `(episode, step, column)` coordinate. Cells are staged in the
//! column's [`Chunker`] and batched into an immutable [`ChunkData`] once
//! `max_chunk_length` cells have accumulated, or earlier when a flush forces
//! sealing. [`Chunker::append`] hands out a weak [`CellRef`] for every cell;
//! the reference resolves against the staging buffer until the chunk is
//! sealed and against the chunk payload afterwards, without the caller
//! noticing the switch.
//!
//! The chunker keeps the newest `num_keep_alive_refs` references alive in a
//! ring, so trajectories assembled from recent cells stay valid after their
//! chunks have been sealed. Older references expire; building a trajectory
//! over an expired reference is a validation error.
//!
//! # Trajectories
//!
//! A [`TrajectoryColumn`] is an ordered run of cell references from one
//! column, optionally squeezed to a single cell. Items reference one or more
//! trajectory columns; upgrading the columns' weak references when the item
//! is created keeps the cells alive until the item has been confirmed by the
//! server, independent of ring eviction.
//!
//! The user facing writer and the stream worker which transports chunks and
//! items live in the companion `relay-client` crate.
pub mod cell_ref;
pub mod chunk;
pub mod chunker;
pub mod error;
pub mod key;
pub mod tensor;
pub mod trajectory;

pub use cell_ref::CellRef;
pub use chunk::{ChunkData, SequenceRange};
pub use chunker::{Chunker, ChunkerConfig};
pub use error::RelayError;
pub use tensor::{Dtype, Tensor, TensorSpec};
pub use trajectory::TrajectoryColumn;
