use super::{ColumnHistory, TrajectoryWriterConfig};
use crate::transport::StreamClient;
use crate::worker::{PendingColumn, PendingItem, StreamWorker, WorkerShared};
use anyhow::Result;
use log::{debug, trace, warn};
use relay_core::{
    key::new_key, CellRef, Chunker, ChunkerConfig, RelayError, Tensor, TensorSpec,
    TrajectoryColumn,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Streams trajectories of tensor valued steps to a replay service.
///
/// The writer owns one [`Chunker`] per column, allocated lazily on first
/// append, and a background stream worker which transports sealed chunks
/// and created items over a bidirectional insert stream. `append` and
/// `create_item` never block on I/O; `flush` and `end_episode` block until
/// the pending items have been confirmed by the server, honoring an optional
/// timeout.
///
/// Dropping the writer performs a best effort flush of the pending items
/// before tearing the worker down.
pub struct TrajectoryWriter {
    config: TrajectoryWriterConfig,
    chunkers: Arc<Mutex<BTreeMap<usize, Chunker>>>,
    /// Overrides registered for columns which have not been appended to yet.
    pending_configs: BTreeMap<usize, ChunkerConfig>,
    history: Vec<ColumnHistory>,
    episode_id: u64,
    episode_step: u64,
    shared: Arc<WorkerShared>,
    worker: Option<JoinHandle<()>>,
}

impl TrajectoryWriter {
    /// Builds a writer streaming through `client` and spawns its worker.
    pub fn new(client: Arc<dyn StreamClient>, config: TrajectoryWriterConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(WorkerShared::new());
        let chunkers = Arc::new(Mutex::new(BTreeMap::new()));
        let worker = StreamWorker::new(client, shared.clone(), chunkers.clone());
        let handle = thread::Builder::new()
            .name("relay-stream-worker".to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            config,
            chunkers,
            pending_configs: BTreeMap::new(),
            history: Vec::new(),
            episode_id: new_key(),
            episode_step: 0,
            shared,
            worker: Some(handle),
        })
    }

    /// Appends one step.
    ///
    /// `step` maps column index to an optional value; absent columns yield
    /// `None` in the result. All present values share the same episode and
    /// step coordinate. A column seen for the first time allocates its
    /// chunker from the first value's dtype and shape, applying a registered
    /// override or the writer defaults.
    pub fn append(&mut self, step: Vec<Option<Tensor>>) -> Result<Vec<Option<Weak<CellRef>>>> {
        self.check_open()?;
        while self.history.len() < step.len() {
            self.history.push(ColumnHistory::with_padding(
                self.episode_step as usize,
            ));
        }

        let width = step.len();
        let mut refs = Vec::with_capacity(width);
        for (column, value) in step.into_iter().enumerate() {
            match value {
                Some(value) => {
                    let chunker = self.chunker(column, &value);
                    let cell = chunker.append(value, self.episode_id, self.episode_step)?;
                    self.history[column].push(Some(cell.clone()));
                    refs.push(Some(cell));
                }
                None => {
                    self.history[column].push(None);
                    refs.push(None);
                }
            }
        }
        // Columns beyond the width of this step still advance one slot.
        for history in self.history.iter_mut().skip(width) {
            history.push(None);
        }
        self.episode_step += 1;

        // Sealed chunks may have unblocked pending items.
        self.shared.cond.notify_all();
        Ok(refs)
    }

    /// Overrides the chunking parameters of one column.
    ///
    /// Columns which have not been appended to yet remember the override and
    /// apply it when their chunker is allocated.
    pub fn configure_chunker(&mut self, column: usize, config: ChunkerConfig) -> Result<()> {
        self.check_open()?;
        config.validate()?;
        let chunkers = self.chunkers.lock().unwrap();
        if let Some(chunker) = chunkers.get(&column) {
            chunker.apply_config(config)
        } else {
            drop(chunkers);
            self.pending_configs.insert(column, config);
            Ok(())
        }
    }

    /// Enqueues an item for `table` referencing `trajectory`.
    ///
    /// The trajectory is validated and the cells it references are locked so
    /// they survive ring eviction until the server has confirmed the item.
    /// The call never blocks on the rate limiter of the destination table;
    /// use [`TrajectoryWriter::flush`] to bound runahead. Items are
    /// transmitted in creation order.
    pub fn create_item(
        &mut self,
        table: &str,
        priority: f64,
        trajectory: &[TrajectoryColumn],
    ) -> Result<()> {
        self.check_open()?;
        if trajectory.iter().all(|c| c.is_empty()) {
            return Err(
                RelayError::InvalidArgument("trajectory must not be empty.".to_string()).into(),
            );
        }
        let mut columns = Vec::with_capacity(trajectory.len());
        for (i, column) in trajectory.iter().enumerate() {
            if column.is_empty() {
                continue;
            }
            columns.push(PendingColumn {
                refs: column.lock_refs(i)?,
                squeeze: column.squeeze(),
            });
        }

        let key = new_key();
        trace!("enqueueing item {:016x} for table {}", key, table);
        let mut state = self.shared.state.lock().unwrap();
        state.outbox.push_back(PendingItem {
            key,
            table: table.to_string(),
            priority,
            columns,
        });
        drop(state);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Blocks until all but the last `ignore_last_num_items` pending items
    /// have been written and confirmed.
    ///
    /// Chunks still staged are sealed first, but only those referenced by the
    /// awaited items; unrelated columns keep batching. On timeout the queues
    /// are left intact and transmission continues in the background.
    pub fn flush(&mut self, ignore_last_num_items: usize, timeout: Option<Duration>) -> Result<()> {
        self.check_open()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let state = self.shared.state.lock().unwrap();
        let awaited = state.outbox.len().saturating_sub(ignore_last_num_items);
        for item in state.outbox.iter().take(awaited) {
            for column in &item.columns {
                for cell in &column.refs {
                    if !cell.is_ready() {
                        if let Some(chunker) = cell.chunker() {
                            chunker.flush()?;
                        }
                    }
                }
            }
        }
        self.shared.cond.notify_all();
        self.wait_until_drained(state, ignore_last_num_items, deadline)
    }

    /// Flushes all pending items and starts a new episode.
    ///
    /// Every chunker is sealed, even those unreferenced by pending items.
    /// The episode id and step counter roll over even when the wait times
    /// out; with `clear_buffers` the keep alive rings and the reference
    /// history are dropped as well, expiring all outstanding handles.
    pub fn end_episode(&mut self, clear_buffers: bool, timeout: Option<Duration>) -> Result<()> {
        self.check_open()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        {
            let chunkers = self.chunkers.lock().unwrap();
            for chunker in chunkers.values() {
                chunker.flush()?;
            }
        }
        self.shared.cond.notify_all();

        let state = self.shared.state.lock().unwrap();
        let result = self.wait_until_drained(state, 0, deadline);

        if clear_buffers {
            let chunkers = self.chunkers.lock().unwrap();
            for chunker in chunkers.values() {
                chunker.reset();
            }
            for history in &mut self.history {
                history.clear();
            }
        }
        self.episode_id = new_key();
        self.episode_step = 0;
        result
    }

    /// Tears down the stream worker without waiting for confirmations.
    ///
    /// Subsequent operations fail with `Cancelled`.
    pub fn close(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
        }
        self.shared.cond.notify_all();
        // Abort a blocking write or read so the worker can observe the flag.
        if let Some(stream) = self.shared.active_stream.lock().unwrap().as_ref() {
            let _ = stream.finish();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Reference history of the columns seen so far, indexed by column.
    pub fn history(&self) -> &[ColumnHistory] {
        &self.history
    }

    /// The episode id stamped on appended cells.
    pub fn episode_id(&self) -> u64 {
        self.episode_id
    }

    fn chunker(&mut self, column: usize, value: &Tensor) -> Chunker {
        let mut chunkers = self.chunkers.lock().unwrap();
        if let Some(chunker) = chunkers.get(&column) {
            return chunker.clone();
        }
        let config = self
            .pending_configs
            .get(&column)
            .copied()
            .unwrap_or_else(|| self.config.chunker_config());
        let spec = TensorSpec::of_value(column.to_string(), value);
        debug!(
            "column {}: allocating chunker (max_chunk_length {}, num_keep_alive_refs {})",
            column, config.max_chunk_length, config.num_keep_alive_refs
        );
        let chunker = Chunker::new(column, spec, config);
        chunkers.insert(column, chunker.clone());
        chunker
    }

    fn check_open(&self) -> Result<()> {
        let state = self.shared.state.lock().unwrap();
        if let Some(err) = &state.terminal {
            return Err(err.clone().into());
        }
        if state.closed {
            return Err(
                RelayError::Cancelled("the writer has been closed.".to_string()).into(),
            );
        }
        Ok(())
    }

    /// Waits until at most `ignore_last_num_items` items remain pending.
    fn wait_until_drained(
        &self,
        mut state: std::sync::MutexGuard<'_, crate::worker::WorkerState>,
        ignore_last_num_items: usize,
        deadline: Option<Instant>,
    ) -> Result<()> {
        loop {
            if let Some(err) = &state.terminal {
                return Err(err.clone().into());
            }
            if state.closed {
                return Err(
                    RelayError::Cancelled("the writer has been closed.".to_string()).into(),
                );
            }
            let waiting = state.outbox.len();
            let confirming = state.in_flight.len();
            if waiting + confirming <= ignore_last_num_items {
                return Ok(());
            }
            state = match deadline {
                None => self.shared.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RelayError::DeadlineExceeded(format!(
                            "Timeout exceeded with {} items waiting to be written and {} items awaiting confirmation.",
                            waiting, confirming
                        ))
                        .into());
                    }
                    let (state, _) = self
                        .shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state
                }
            };
        }
    }
}

impl Drop for TrajectoryWriter {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.flush(0, None) {
                warn!("flush on drop failed: {}", err);
            }
            self.close();
        }
    }
}
