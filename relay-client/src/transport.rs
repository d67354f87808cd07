//! Abstraction of the bidirectional insert stream.
//!
//! The concrete transport (gRPC, an in process loopback, a test double) is
//! supplied by the caller. The writer only assumes an ordered bidirectional
//! message stream with connect, finish and status semantics.
use crate::message::InsertRequest;
use anyhow::Result;
use std::sync::Arc;

/// Connects insert streams to a replay service.
///
/// The endpoint to connect to lives with the implementation; the stream
/// worker opens a fresh stream after every transient failure.
pub trait StreamClient: Send + Sync {
    /// Opens a new insert stream.
    ///
    /// A [`RelayError`](relay_core::RelayError) inside the error is
    /// classified like a stream status: `Unavailable` makes the worker retry,
    /// anything else is terminal.
    fn open_stream(&self) -> Result<Arc<dyn InsertStream>>;
}

/// One bidirectional insert stream connection.
///
/// `write` and `read` may be called concurrently from different threads, as
/// with a gRPC reader/writer pair. After `finish` has been called both must
/// unblock: `write` returns `false` and `read` returns `None`. `finish` is
/// idempotent; repeated calls report the same status.
pub trait InsertStream: Send + Sync {
    /// Writes one message. Returns `false` once the stream is broken; the
    /// cause is reported by `finish`.
    fn write(&self, request: InsertRequest) -> bool;

    /// Blocks for the next confirmed item key. `None` signals end of stream.
    fn read(&self) -> Option<u64>;

    /// Terminates the stream and reports its status. `Ok` means the stream
    /// was shut down cleanly.
    fn finish(&self) -> Result<()>;
}
