//! Background worker owning the insert stream.
use crate::message::{FlatColumn, InsertRequest, ItemData};
use crate::transport::{InsertStream, StreamClient};
use log::{debug, trace, warn};
use relay_core::{CellRef, ChunkData, Chunker, RelayError};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// An item accepted by the writer but not yet confirmed by the server.
///
/// The strong cell references keep the trajectory's cells (and through them
/// their chunks) alive until the item leaves the pending queues.
#[derive(Clone)]
pub(crate) struct PendingItem {
    pub key: u64,
    pub table: String,
    pub priority: f64,
    pub columns: Vec<PendingColumn>,
}

#[derive(Clone)]
pub(crate) struct PendingColumn {
    pub refs: Vec<Arc<CellRef>>,
    pub squeeze: bool,
}

impl PendingItem {
    /// `true` once every referenced cell's chunk has been sealed.
    fn is_ready(&self) -> bool {
        self.columns
            .iter()
            .all(|c| c.refs.iter().all(|r| r.is_ready()))
    }

    /// The chunks the item references, deduplicated, in trajectory order.
    fn chunks(&self) -> Vec<Arc<ChunkData>> {
        let mut chunks: Vec<Arc<ChunkData>> = Vec::new();
        for column in &self.columns {
            for r in &column.refs {
                if let Some(chunk) = r.chunk() {
                    if !chunks.iter().any(|c| c.key() == chunk.key()) {
                        chunks.push(chunk);
                    }
                }
            }
        }
        chunks
    }

    fn to_message(&self, keep_chunk_keys: Vec<u64>) -> ItemData {
        ItemData {
            key: self.key,
            table: self.table.clone(),
            priority: self.priority,
            columns: self
                .columns
                .iter()
                .map(|c| FlatColumn::from_refs(&c.refs, c.squeeze))
                .collect(),
            keep_chunk_keys,
            send_confirmation: true,
        }
    }
}

/// Queues and flags shared between the writer facade, the worker thread and
/// the per connection reader thread.
pub(crate) struct WorkerState {
    /// Items waiting to be written, in `create_item` order.
    pub outbox: VecDeque<PendingItem>,
    /// Items written on the current connection, awaiting confirmation.
    pub in_flight: VecDeque<PendingItem>,
    /// First non retryable error observed; fails all further operations.
    pub terminal: Option<RelayError>,
    /// Set by `close`; the worker exits without waiting for confirmations.
    pub closed: bool,
    /// Set by the reader thread when the current connection hits EOF.
    stream_broken: bool,
}

pub(crate) struct WorkerShared {
    pub state: Mutex<WorkerState>,
    pub cond: Condvar,
    /// The connection currently owned by the worker, kept here so that
    /// `close` can abort a blocking write or read.
    pub active_stream: Mutex<Option<Arc<dyn InsertStream>>>,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState {
                outbox: VecDeque::new(),
                in_flight: VecDeque::new(),
                terminal: None,
                closed: false,
                stream_broken: false,
            }),
            cond: Condvar::new(),
            active_stream: Mutex::new(None),
        }
    }
}

enum StreamEnd {
    /// The writer was closed; stop without reconnecting.
    Closed,
    /// A write failed or the reader hit EOF; classify via `finish`.
    Interrupted,
}

/// The background task bound to one writer.
///
/// Owns the stream connection and the per connection chunk deduplication
/// set. Drains the outbox in order, sending the chunks an item needs before
/// the item itself, and reconnects transparently on transient stream
/// failures.
pub(crate) struct StreamWorker {
    client: Arc<dyn StreamClient>,
    shared: Arc<WorkerShared>,
    chunkers: Arc<Mutex<BTreeMap<usize, Chunker>>>,
}

impl StreamWorker {
    pub fn new(
        client: Arc<dyn StreamClient>,
        shared: Arc<WorkerShared>,
        chunkers: Arc<Mutex<BTreeMap<usize, Chunker>>>,
    ) -> Self {
        Self {
            client,
            shared,
            chunkers,
        }
    }

    /// Runs until the writer is closed or a terminal error occurs.
    pub fn run(self) {
        loop {
            if self.shared.state.lock().unwrap().closed {
                break;
            }
            let stream = match self.client.open_stream() {
                Ok(stream) => stream,
                Err(err) => {
                    let err = classify(err);
                    if err.is_transient() {
                        warn!("failed to open insert stream ({}); retrying", err);
                        thread::sleep(Duration::from_millis(100));
                        continue;
                    }
                    self.publish_terminal(err);
                    break;
                }
            };
            debug!("insert stream opened");
            self.shared.state.lock().unwrap().stream_broken = false;
            *self.shared.active_stream.lock().unwrap() = Some(stream.clone());

            let reader = spawn_reader(stream.clone(), self.shared.clone());
            let end = self.run_stream(&stream);
            let status = stream.finish();
            let _ = reader.join();
            *self.shared.active_stream.lock().unwrap() = None;

            match end {
                StreamEnd::Closed => break,
                StreamEnd::Interrupted => {
                    let err = match status {
                        Ok(()) => {
                            RelayError::Unavailable("stream closed by the server".to_string())
                        }
                        Err(err) => classify(err),
                    };
                    if err.is_transient() {
                        warn!("insert stream interrupted ({}); reconnecting", err);
                        self.requeue_unconfirmed();
                        continue;
                    }
                    warn!("insert stream failed: {}", err);
                    self.publish_terminal(err);
                    break;
                }
            }
        }
    }

    /// Drains the outbox onto one connection until it breaks or the writer
    /// closes.
    fn run_stream(&self, stream: &Arc<dyn InsertStream>) -> StreamEnd {
        enum Action {
            Chunks(Vec<Arc<ChunkData>>),
            Item(PendingItem),
        }

        let mut sent_chunks: HashSet<u64> = HashSet::new();
        loop {
            let action = {
                let mut state = self.shared.state.lock().unwrap();
                loop {
                    if state.closed {
                        return StreamEnd::Closed;
                    }
                    if state.stream_broken {
                        return StreamEnd::Interrupted;
                    }
                    if let Some(front) = state.outbox.front() {
                        if front.is_ready() {
                            break Action::Item(front.clone());
                        }
                    }
                    // Sealed chunks of pending items flow out eagerly, ahead
                    // of the items which reference them.
                    let chunks = sealed_unsent_chunks(&state.outbox, &sent_chunks);
                    if !chunks.is_empty() {
                        break Action::Chunks(chunks);
                    }
                    state = self.shared.cond.wait(state).unwrap();
                }
            };

            match action {
                Action::Chunks(chunks) => {
                    for chunk in chunks {
                        let key = chunk.key();
                        trace!("sending chunk {:016x}", key);
                        if !stream.write(InsertRequest::Chunk(chunk)) {
                            return StreamEnd::Interrupted;
                        }
                        sent_chunks.insert(key);
                    }
                }
                Action::Item(item) => {
                    for chunk in item.chunks() {
                        if sent_chunks.contains(&chunk.key()) {
                            continue;
                        }
                        let key = chunk.key();
                        trace!("sending chunk {:016x}", key);
                        if !stream.write(InsertRequest::Chunk(chunk)) {
                            return StreamEnd::Interrupted;
                        }
                        sent_chunks.insert(key);
                    }

                    let keep_chunk_keys = self.keep_chunk_keys(&sent_chunks);
                    let message = item.to_message(keep_chunk_keys);

                    // The item must be in the confirmation queue before the
                    // write; the server may confirm immediately.
                    {
                        let mut state = self.shared.state.lock().unwrap();
                        let front = state.outbox.pop_front().unwrap();
                        debug_assert_eq!(front.key, item.key);
                        state.in_flight.push_back(front);
                        self.shared.cond.notify_all();
                    }

                    trace!("sending item {:016x} for table {}", item.key, item.table);
                    if !stream.write(InsertRequest::Item(message)) {
                        return StreamEnd::Interrupted;
                    }
                }
            }
        }
    }

    /// Union of the live chunkers' keep keys, restricted to chunks the
    /// server has actually seen on this connection.
    fn keep_chunk_keys(&self, sent_chunks: &HashSet<u64>) -> Vec<u64> {
        let chunkers = self.chunkers.lock().unwrap();
        let mut keys = Vec::new();
        for chunker in chunkers.values() {
            for key in chunker.keep_keys() {
                if sent_chunks.contains(&key) && !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Moves unconfirmed items back to the head of the outbox, preserving
    /// their original order, so the next connection resends them.
    fn requeue_unconfirmed(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while let Some(item) = state.in_flight.pop_back() {
            state.outbox.push_front(item);
        }
        self.shared.cond.notify_all();
    }

    fn publish_terminal(&self, err: RelayError) {
        let mut state = self.shared.state.lock().unwrap();
        if state.terminal.is_none() {
            state.terminal = Some(err);
        }
        self.shared.cond.notify_all();
    }
}

/// Sealed chunks referenced by pending items which the current connection
/// has not carried yet, in queue order, deduplicated.
fn sealed_unsent_chunks(
    outbox: &VecDeque<PendingItem>,
    sent_chunks: &HashSet<u64>,
) -> Vec<Arc<ChunkData>> {
    let mut chunks: Vec<Arc<ChunkData>> = Vec::new();
    for item in outbox {
        for column in &item.columns {
            for cell in &column.refs {
                if let Some(chunk) = cell.chunk() {
                    if !sent_chunks.contains(&chunk.key())
                        && !chunks.iter().any(|c| c.key() == chunk.key())
                    {
                        chunks.push(chunk);
                    }
                }
            }
        }
    }
    chunks
}

/// Consumes confirmations until the stream ends.
fn spawn_reader(stream: Arc<dyn InsertStream>, shared: Arc<WorkerShared>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match stream.read() {
            Some(key) => {
                let mut state = shared.state.lock().unwrap();
                if let Some(i) = state.in_flight.iter().position(|item| item.key == key) {
                    state.in_flight.remove(i);
                    trace!("item {:016x} confirmed", key);
                } else {
                    debug!("confirmation for unknown item {:016x}", key);
                }
                shared.cond.notify_all();
            }
            None => {
                shared.state.lock().unwrap().stream_broken = true;
                shared.cond.notify_all();
                break;
            }
        }
    })
}

fn classify(err: anyhow::Error) -> RelayError {
    match err.downcast::<RelayError>() {
        Ok(err) => err,
        Err(err) => RelayError::Internal(err.to_string()),
    }
}
