//! Key minting for chunks, items and episodes.
use rand::Rng;

/// Returns a fresh 64 bit key.
///
/// Keys are drawn uniformly at random. The server deduplicates chunks by key
/// across writers and across reconnects of the same writer, so keys must not
/// be reused between stream connections or between processes.
pub fn new_key() -> u64 {
    rand::thread_rng().gen()
}
