#![warn(missing_docs)]
//! Client for streaming experience trajectories to a replay service.
//!
//! The writing pipeline consists of the following components:
//!
//! * [`TrajectoryWriter`] is the facade the user interacts with. It owns one
//!   chunker per column (see `relay-core`), validates appended values and
//!   created items, and exposes the blocking `flush`, `end_episode` and
//!   `close` operations.
//! * The stream worker is a background thread bound to one bidirectional
//!   insert stream. It drains the item outbox in creation order, waits until
//!   every cell an item references has been sealed into a chunk, writes the
//!   chunks the connection has not carried yet followed by the item message,
//!   and tracks confirmations the server echoes back. Transient stream
//!   failures are retried transparently by reconnecting and resending
//!   whatever has not been confirmed; any other failure is published as the
//!   writer's terminal error.
//! * [`StreamClient`] and [`InsertStream`] abstract the transport; the
//!   concrete RPC stack (or an in process double in tests) is provided by
//!   the caller.
//!
//! Data flows `append` -> chunker staging -> sealed chunk -> stream worker
//! -> server, with items gating on the readiness of the chunks they
//! reference. Sealing is driven by `max_chunk_length`, by `flush` (which
//! seals only what the awaited items need) and by `end_episode` (which seals
//! everything).
mod message;
mod transport;
mod worker;
mod writer;

pub use message::{ColumnSlice, FlatColumn, InsertRequest, ItemData};
pub use transport::{InsertStream, StreamClient};
pub use writer::{ColumnHistory, TrajectoryWriter, TrajectoryWriterConfig};
