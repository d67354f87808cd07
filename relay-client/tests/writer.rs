use anyhow::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::{ArrayD, IxDyn};
use relay_client::{
    InsertRequest, InsertStream, StreamClient, TrajectoryWriter, TrajectoryWriterConfig,
};
use relay_core::{CellRef, ChunkerConfig, RelayError, Tensor, TrajectoryColumn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn int_value(v: i32) -> Tensor {
    Tensor::from(ArrayD::from_elem(IxDyn(&[1]), v))
}

fn float_value(v: f32) -> Tensor {
    Tensor::from(ArrayD::from_elem(IxDyn(&[1]), v))
}

fn col(refs: &[&Option<Weak<CellRef>>]) -> TrajectoryColumn {
    TrajectoryColumn::new(
        refs.iter().map(|r| r.as_ref().unwrap().clone()).collect(),
        false,
    )
}

fn kind(err: &Error) -> &RelayError {
    err.downcast_ref::<RelayError>().expect("not a relay error")
}

/// Serves confirmations for every item written to it, mirroring a healthy
/// server connection.
struct FakeStream {
    requests: Mutex<Vec<InsertRequest>>,
    confirm_tx: Mutex<Option<Sender<u64>>>,
    confirm_rx: Receiver<u64>,
}

impl FakeStream {
    fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            confirm_tx: Mutex::new(Some(tx)),
            confirm_rx: rx,
        })
    }

    fn requests(&self) -> Vec<InsertRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn wait_for_requests(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.requests.lock().unwrap().len() < n {
            assert!(Instant::now() < deadline, "timed out waiting for requests");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl InsertStream for FakeStream {
    fn write(&self, request: InsertRequest) -> bool {
        let confirm = request
            .as_item()
            .filter(|item| item.send_confirmation)
            .map(|item| item.key);
        self.requests.lock().unwrap().push(request);
        if let Some(key) = confirm {
            if let Some(tx) = self.confirm_tx.lock().unwrap().as_ref() {
                let _ = tx.send(key);
            }
        }
        true
    }

    fn read(&self) -> Option<u64> {
        self.confirm_rx.recv().ok()
    }

    fn finish(&self) -> Result<()> {
        self.confirm_tx.lock().unwrap().take();
        Ok(())
    }
}

/// Accepts chunks but fails the first item write, then reports `status`.
struct FailingStream {
    requests: Mutex<Vec<InsertRequest>>,
    status: RelayError,
    read_tx: Mutex<Option<Sender<u64>>>,
    read_rx: Receiver<u64>,
}

impl FailingStream {
    fn new(status: RelayError) -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            status,
            read_tx: Mutex::new(Some(tx)),
            read_rx: rx,
        })
    }
}

impl InsertStream for FailingStream {
    fn write(&self, request: InsertRequest) -> bool {
        if request.is_chunk() {
            self.requests.lock().unwrap().push(request);
            true
        } else {
            false
        }
    }

    fn read(&self) -> Option<u64> {
        self.read_rx.recv().ok()
    }

    fn finish(&self) -> Result<()> {
        self.read_tx.lock().unwrap().take();
        Err(self.status.clone().into())
    }
}

/// Blocks every write until released; used for timeout tests.
struct BlockingStream {
    release_tx: Mutex<Option<Sender<()>>>,
    release_rx: Receiver<()>,
    read_tx: Mutex<Option<Sender<u64>>>,
    read_rx: Receiver<u64>,
}

impl BlockingStream {
    fn new() -> Arc<Self> {
        let (release_tx, release_rx) = unbounded();
        let (read_tx, read_rx) = unbounded();
        Arc::new(Self {
            release_tx: Mutex::new(Some(release_tx)),
            release_rx,
            read_tx: Mutex::new(Some(read_tx)),
            read_rx,
        })
    }

    fn unblock(&self) {
        self.release_tx.lock().unwrap().take();
    }
}

impl InsertStream for BlockingStream {
    fn write(&self, _request: InsertRequest) -> bool {
        let _ = self.release_rx.recv();
        true
    }

    fn read(&self) -> Option<u64> {
        self.read_rx.recv().ok()
    }

    fn finish(&self) -> Result<()> {
        self.release_tx.lock().unwrap().take();
        self.read_tx.lock().unwrap().take();
        Ok(())
    }
}

/// Hands out the prepared streams in order, one per connection attempt.
struct FakeClient {
    streams: Mutex<VecDeque<Arc<dyn InsertStream>>>,
}

impl FakeClient {
    fn new(streams: Vec<Arc<dyn InsertStream>>) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(streams.into()),
        })
    }
}

impl StreamClient for FakeClient {
    fn open_stream(&self) -> Result<Arc<dyn InsertStream>> {
        self.streams.lock().unwrap().pop_front().ok_or_else(|| {
            RelayError::Internal("no more connections expected by the test".to_string()).into()
        })
    }
}

fn make_writer(
    streams: Vec<Arc<dyn InsertStream>>,
    max_chunk_length: usize,
    num_keep_alive_refs: usize,
) -> TrajectoryWriter {
    TrajectoryWriter::new(
        FakeClient::new(streams),
        TrajectoryWriterConfig::new(max_chunk_length, num_keep_alive_refs),
    )
    .unwrap()
}

#[test]
fn append_validates_dtype_against_first_step() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 10, 10);

    // The first step establishes the column specs.
    writer
        .append(vec![Some(int_value(0)), Some(float_value(0.0))])
        .unwrap();

    let err = writer
        .append(vec![Some(int_value(1)), Some(int_value(1))])
        .unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument(
            "Tensor of wrong dtype provided for column 1. Got int32 but expected float."
                .to_string()
        )
    );
}

#[test]
fn append_validates_shape_against_first_step() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 10, 10);

    writer.append(vec![Some(int_value(0))]).unwrap();

    let err = writer
        .append(vec![Some(Tensor::from(ArrayD::from_elem(IxDyn(&[3]), 0i32)))])
        .unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument(
            "Tensor of incompatible shape provided for column 0. Got [3] which is incompatible with [1].".to_string()
        )
    );
}

#[test]
fn append_accepts_partial_steps() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 10, 10);

    writer
        .append(vec![Some(int_value(0)), Some(float_value(0.0))])
        .unwrap();

    let refs = writer.append(vec![Some(int_value(1)), None]).unwrap();
    assert!(refs[0].is_some());
    assert!(refs[1].is_none());
}

#[test]
fn configure_chunker_on_existing_column() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 1);

    // With max_chunk_length 1 the first chunk seals immediately.
    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    assert!(first[0].as_ref().unwrap().upgrade().unwrap().is_ready());

    writer.configure_chunker(0, ChunkerConfig::new(2, 2)).unwrap();

    // The next step stays staged.
    let second = writer.append(vec![Some(int_value(1))]).unwrap();
    assert!(!second[0].as_ref().unwrap().upgrade().unwrap().is_ready());

    // The third step seals, and two refs are now kept alive.
    let third = writer.append(vec![Some(int_value(2))]).unwrap();
    assert!(second[0].as_ref().unwrap().upgrade().unwrap().is_ready());
    assert!(third[0].as_ref().unwrap().upgrade().unwrap().is_ready());
}

#[test]
fn configure_chunker_on_future_column() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 1);

    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    assert!(first[0].as_ref().unwrap().upgrade().unwrap().is_ready());

    // Configure the not yet seen second column.
    writer.configure_chunker(1, ChunkerConfig::new(2, 2)).unwrap();

    // Column 0 keeps sealing per step; column 1 stages its first cell.
    let second = writer
        .append(vec![Some(int_value(1)), Some(int_value(1))])
        .unwrap();
    assert!(second[0].as_ref().unwrap().upgrade().unwrap().is_ready());
    assert!(!second[1].as_ref().unwrap().upgrade().unwrap().is_ready());

    // The first ref of column 0 has been evicted (num_keep_alive_refs 1).
    assert!(first[0].as_ref().unwrap().upgrade().is_none());

    // The third step seals both columns; column 1 keeps both refs alive.
    let third = writer
        .append(vec![Some(int_value(2)), Some(int_value(2))])
        .unwrap();
    assert!(third[0].as_ref().unwrap().upgrade().unwrap().is_ready());
    assert!(third[1].as_ref().unwrap().upgrade().unwrap().is_ready());
    assert!(second[0].as_ref().unwrap().upgrade().is_none());
    assert!(second[1].as_ref().unwrap().upgrade().is_some());
}

#[test]
fn nothing_sent_without_items() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 1, 1);

    for i in 0..10 {
        writer.append(vec![Some(int_value(i))]).unwrap();
    }
    thread::sleep(Duration::from_millis(50));
    assert!(stream.requests().is_empty());
}

#[test]
fn item_sent_straight_away_if_chunks_ready() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 1, 1);

    let refs = writer.append(vec![Some(int_value(0))]).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(stream.requests().is_empty());

    // The chunk is sealed already, so the item goes out immediately, chunk
    // first.
    writer.create_item("table", 1.0, &[col(&[&refs[0]])]).unwrap();
    stream.wait_for_requests(2);
    let requests = stream.requests();
    assert!(requests[0].is_chunk());
    assert_eq!(requests[1].as_item().unwrap().priority, 1.0);

    // A second item over the same cells is sent without resending the chunk.
    writer.create_item("table", 0.5, &[col(&[&refs[0]])]).unwrap();
    stream.wait_for_requests(3);
    let requests = stream.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].as_item().unwrap().priority, 0.5);
}

#[test]
fn item_waits_for_all_referenced_chunks() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 2, 5);

    // Write to both columns in the first step and reference row 0 of each.
    let first = writer
        .append(vec![Some(int_value(0)), Some(int_value(0))])
        .unwrap();
    writer
        .create_item("table", 1.0, &[col(&[&first[0]]), col(&[&first[1]])])
        .unwrap();

    // Nothing is sent: neither chunk is sealed.
    thread::sleep(Duration::from_millis(50));
    assert!(stream.requests().is_empty());

    // The second step only touches column 0, sealing its chunk. The chunk
    // goes out but the item still waits for column 1.
    writer.append(vec![Some(int_value(1)), None]).unwrap();
    stream.wait_for_requests(1);
    assert!(stream.requests()[0].is_chunk());

    // More appends to column 0, even sealing another chunk, send nothing.
    writer.append(vec![Some(int_value(2)), None]).unwrap();
    writer.append(vec![Some(int_value(3)), None]).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(stream.requests().len(), 1);

    // Writing to column 1 seals its chunk; the chunk and then the item go
    // out.
    writer.append(vec![None, Some(int_value(4))]).unwrap();
    stream.wait_for_requests(3);
    let requests = stream.requests();
    assert!(requests[0].is_chunk());
    assert!(requests[1].is_chunk());
    assert!(requests[2].as_item().is_some());
}

#[test]
fn flush_sends_pending_items_and_seals_only_what_they_need() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 2, 2);

    let first = writer
        .append(vec![Some(int_value(0)), Some(int_value(0))])
        .unwrap();
    writer.create_item("table", 1.0, &[col(&[&first[1]])]).unwrap();

    thread::sleep(Duration::from_millis(20));
    assert!(stream.requests().is_empty());

    // Flush seals the chunk of column 1 only; column 0 is unreferenced by
    // the pending item and keeps batching.
    writer.flush(0, None).unwrap();
    assert!(!first[0].as_ref().unwrap().upgrade().unwrap().is_ready());
    assert!(first[1].as_ref().unwrap().upgrade().unwrap().is_ready());

    let requests = stream.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].is_chunk());
    assert!(requests[1].as_item().is_some());
}

#[test]
fn flush_can_ignore_pending_items() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 2, 2);

    let first = writer
        .append(vec![Some(int_value(0)), Some(int_value(1))])
        .unwrap();

    // Two items, each referencing a different column.
    writer.create_item("table", 1.0, &[col(&[&first[0]])]).unwrap();
    writer.create_item("table", 1.0, &[col(&[&first[1]])]).unwrap();

    // Only the first item is awaited; the second stays pending with its
    // column untouched.
    writer.flush(1, None).unwrap();

    let requests = stream.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].is_chunk());
    assert!(requests[1].as_item().is_some());
    assert!(first[0].as_ref().unwrap().upgrade().unwrap().is_ready());
    assert!(!first[1].as_ref().unwrap().upgrade().unwrap().is_ready());

    // Closing instead of flushing: the second item was never sent.
    writer.close();
}

#[test]
fn drop_flushes_pending_items() {
    init();
    let stream = FakeStream::new();
    {
        let mut writer = make_writer(vec![stream.clone()], 2, 2);
        let first = writer.append(vec![Some(int_value(0))]).unwrap();
        writer.create_item("table", 1.0, &[col(&[&first[0]])]).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(stream.requests().is_empty());
    }

    let requests = stream.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].is_chunk());
    assert!(requests[1].as_item().is_some());
}

#[test]
fn retries_on_transient_error() {
    init();
    let fail_stream = FailingStream::new(RelayError::Unavailable("".to_string()));
    let success_stream = FakeStream::new();
    let mut writer = make_writer(
        vec![fail_stream.clone(), success_stream.clone()],
        1,
        1,
    );

    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    writer.create_item("table", 1.0, &[col(&[&first[0]])]).unwrap();
    writer.flush(0, None).unwrap();

    // The first connection died after the chunk write. The writer opened a
    // second stream and resent the chunk before the item, since the new
    // connection may reach a different server.
    let requests = success_stream.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].is_chunk());
    assert!(requests[1].as_item().is_some());
}

#[test]
fn stops_on_non_transient_error() {
    init();
    let fail_stream = FailingStream::new(RelayError::Internal("A reason".to_string()));
    let mut writer = make_writer(vec![fail_stream], 1, 1);

    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    writer.create_item("table", 1.0, &[col(&[&first[0]])]).unwrap();

    // Flush surfaces the error encountered by the stream worker.
    let err = writer.flush(0, None).unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::Internal("A reason".to_string())
    );

    // Every subsequent operation returns the same terminal error.
    let err = writer
        .create_item("table", 1.0, &[col(&[&first[0]])])
        .unwrap_err();
    assert!(err.to_string().contains("A reason"));

    let err = writer.append(vec![Some(int_value(1))]).unwrap_err();
    assert!(err.to_string().contains("A reason"));
}

#[test]
fn flush_returns_if_timeout_expired() {
    init();
    let stream = BlockingStream::new();
    let mut writer = make_writer(vec![stream.clone()], 1, 1);

    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    writer.create_item("table", 1.0, &[col(&[&first[0]])]).unwrap();

    let err = writer
        .flush(0, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::DeadlineExceeded(
            "Timeout exceeded with 1 items waiting to be written and 0 items awaiting confirmation.".to_string()
        )
    );

    // Unblock the stream and close without waiting for confirmations.
    stream.unblock();
    writer.close();
}

#[test]
fn end_episode_returns_if_timeout_expired() {
    init();
    let stream = BlockingStream::new();
    let mut writer = make_writer(vec![stream.clone()], 2, 2);

    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    writer.create_item("table", 1.0, &[col(&[&first[0]])]).unwrap();

    let err = writer
        .end_episode(true, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::DeadlineExceeded(
            "Timeout exceeded with 1 items waiting to be written and 0 items awaiting confirmation.".to_string()
        )
    );

    stream.unblock();
    writer.close();
}

#[test]
fn operations_fail_after_close() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 1);

    writer.append(vec![Some(int_value(0))]).unwrap();
    writer.close();

    let err = writer.append(vec![Some(int_value(1))]).unwrap_err();
    assert!(matches!(kind(&err), RelayError::Cancelled(_)));
}

#[test]
fn create_item_rejects_expired_refs() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 1);

    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    writer.append(vec![Some(int_value(1))]).unwrap();

    // num_keep_alive_refs is 1 so the first step has expired.
    let err = writer
        .create_item("table", 1.0, &[col(&[&first[0]])])
        .unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument(
            "Error in column 0: column contains an expired cell reference.".to_string()
        )
    );
}

#[test]
fn create_item_validates_column_dtypes() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 2);

    let step = writer
        .append(vec![Some(int_value(0)), Some(float_value(0.0))])
        .unwrap();

    // Mixing the two writer columns inside one trajectory column.
    let err = writer
        .create_item("table", 1.0, &[col(&[&step[0], &step[1]])])
        .unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument(
            "Error in column 0: column references tensors with different dtypes: int32 (index 0) != float (index 1).".to_string()
        )
    );
}

#[test]
fn create_item_validates_column_shapes() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 2);

    let step = writer
        .append(vec![
            Some(int_value(0)),
            Some(Tensor::from(ArrayD::from_elem(IxDyn(&[2]), 0i32))),
        ])
        .unwrap();

    let err = writer
        .create_item("table", 1.0, &[col(&[&step[0], &step[1]])])
        .unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument(
            "Error in column 0: column references tensors with incompatible shapes: [1] (index 0) not compatible with [2] (index 1).".to_string()
        )
    );
}

#[test]
fn create_item_validates_trajectory_not_empty() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 1);

    writer.append(vec![Some(int_value(0))]).unwrap();

    let err = writer.create_item("table", 1.0, &[]).unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument("trajectory must not be empty.".to_string())
    );

    let empty = [
        TrajectoryColumn::new(Vec::new(), false),
        TrajectoryColumn::new(Vec::new(), false),
    ];
    let err = writer.create_item("table", 1.0, &empty).unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument("trajectory must not be empty.".to_string())
    );
}

#[test]
fn create_item_validates_squeezed_columns() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 1);

    let step = writer.append(vec![Some(int_value(0))]).unwrap();
    let cell = step[0].as_ref().unwrap().clone();

    let two_rows = [TrajectoryColumn::new(vec![cell.clone(), cell], true)];
    let err = writer.create_item("table", 1.0, &two_rows).unwrap_err();
    assert_eq!(
        kind(&err),
        &RelayError::InvalidArgument(
            "Error in column 0: column must contain exactly one row when squeeze is set but got 2.".to_string()
        )
    );
}

#[test]
fn keep_keys_only_include_streamed_chunks() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 1, 1);

    // Two columns, but only column 0 is referenced by the item.
    let first = writer
        .append(vec![Some(int_value(0)), Some(int_value(0))])
        .unwrap();
    writer.create_item("table", 1.0, &[col(&[&first[0]])]).unwrap();
    writer.flush(0, None).unwrap();

    // The server only needs to be told about the chunk it has seen.
    let requests = stream.requests();
    let expected = first[0].as_ref().unwrap().upgrade().unwrap().chunk_key();
    assert_eq!(
        requests.last().unwrap().as_item().unwrap().keep_chunk_keys,
        vec![expected]
    );
}

#[test]
fn keep_keys_only_include_live_chunks() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 1, 2);

    let mut chunk_keys = Vec::new();
    for i in 0..3 {
        let step = writer.append(vec![Some(int_value(i))]).unwrap();
        chunk_keys.push(step[0].as_ref().unwrap().upgrade().unwrap().chunk_key());
        writer.create_item("table", 1.0, &[col(&[&step[0]])]).unwrap();
        writer.flush(0, None).unwrap();

        let requests = stream.requests();
        let keep = &requests.last().unwrap().as_item().unwrap().keep_chunk_keys;
        // The ring holds the two newest chunks, so the oldest key drops out
        // of the keep set as the episode progresses.
        let window = &chunk_keys[chunk_keys.len().saturating_sub(2)..];
        assert_eq!(keep, window);
    }
}

#[test]
fn end_episode_can_clear_buffers() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 2, 2);

    let step = writer.append(vec![Some(int_value(0))]).unwrap();

    // Without clearing, the reference stays alive.
    writer.end_episode(false, None).unwrap();
    assert!(step[0].as_ref().unwrap().upgrade().is_some());

    // Clearing expires it.
    writer.end_episode(true, None).unwrap();
    assert!(step[0].as_ref().unwrap().upgrade().is_none());
}

#[test]
fn end_episode_seals_chunks_even_without_items() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 2, 2);

    let step = writer.append(vec![Some(int_value(0))]).unwrap();
    assert!(!step[0].as_ref().unwrap().upgrade().unwrap().is_ready());

    // Unlike flush, end_episode seals columns no pending item references.
    writer.end_episode(false, None).unwrap();
    assert!(step[0].as_ref().unwrap().upgrade().unwrap().is_ready());
}

#[test]
fn end_episode_rolls_episode_and_step_over() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream], 1, 2);

    let first = writer.append(vec![Some(int_value(0))]).unwrap();
    writer.end_episode(false, None).unwrap();
    let second = writer.append(vec![Some(int_value(1))]).unwrap();

    let first = first[0].as_ref().unwrap().upgrade().unwrap();
    let second = second[0].as_ref().unwrap().upgrade().unwrap();
    assert_ne!(first.episode_id(), second.episode_id());
    assert_eq!(first.episode_step(), 0);
    assert_eq!(second.episode_step(), 0);
}

#[test]
fn history_builds_trajectory_columns() {
    init();
    let stream = FakeStream::new();
    let mut writer = make_writer(vec![stream.clone()], 1, 5);

    for i in 0..3 {
        writer
            .append(vec![Some(int_value(i)), (i == 1).then(|| float_value(1.0))])
            .unwrap();
    }

    // Column 0 has a value at every step, column 1 only at step 1.
    let trajectory = vec![
        writer.history()[0].column(0..3).unwrap(),
        writer.history()[1].at(1).unwrap(),
    ];
    assert!(writer.history()[1].column(0..3).is_err());

    writer.create_item("table", 1.0, &trajectory).unwrap();
    writer.flush(0, None).unwrap();

    let requests = stream.requests();
    let item = requests.last().unwrap().as_item().unwrap();
    assert_eq!(item.columns.len(), 2);
    assert_eq!(item.columns[0].slices.len(), 3);
    assert!(!item.columns[0].squeeze);
    assert_eq!(item.columns[1].slices.len(), 1);
    assert!(item.columns[1].squeeze);

    // Clearing the episode resets the history.
    writer.end_episode(true, None).unwrap();
    assert!(writer.history()[0].is_empty());
}
