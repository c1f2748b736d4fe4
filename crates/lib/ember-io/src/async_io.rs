use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;

use ember_job::{JobPriority, JobSystem, Semaphore, SpinLock};

use crate::decompress::BlockCodec;
use crate::vfs::{Stream, StreamFactory};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum IoPriority {
    High = 0,
    Normal,
    Low,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum AsyncStatus {
    Queued = 0,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl AsyncStatus {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => AsyncStatus::Queued,
            1 => AsyncStatus::InProgress,
            2 => AsyncStatus::Succeeded,
            3 => AsyncStatus::Failed,
            4 => AsyncStatus::Cancelled,
            _ => unreachable!(),
        }
    }
}

pub struct AsyncReadResult {
    pub status: AsyncStatus,
    pub data: Bytes,
}

/// Whole-file (or range) read request.
pub struct AsyncReadRequest {
    pub path: String,
    pub offset: u64,
    /// `None` reads to the end of the stream.
    pub size: Option<u64>,
    pub callback: Box<dyn FnOnce(AsyncReadResult) + Send>,
}

#[derive(Clone, Copy, Debug)]
pub struct BlockRange {
    pub offset: u64,
    pub compressed_size: u64,
    pub decompressed_size: u64,
}

pub struct BlockReadResult {
    pub block_index: usize,
    pub status: AsyncStatus,
    pub data: Bytes,
}

/// Multi-block read: each block is read by the I/O thread and decoded on a
/// job-system worker before its callback fires.
pub struct AsyncBlockReadRequest {
    pub path: String,
    pub blocks: Vec<BlockRange>,
    pub codec: Arc<dyn BlockCodec>,
    pub callback: Arc<dyn Fn(BlockReadResult) + Send + Sync>,
}

struct RequestState {
    cancellation_requested: AtomicBool,
    status: AtomicU32,
}

impl RequestState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancellation_requested: AtomicBool::new(false),
            status: AtomicU32::new(AsyncStatus::Queued as u32),
        })
    }

    fn set_status(&self, status: AsyncStatus) {
        self.status.store(status as u32, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_requested.load(Ordering::Acquire)
    }
}

/// Caller-side handle to one queued request.
pub struct AsyncController {
    state: Arc<RequestState>,
}

impl AsyncController {
    /// Cooperative: the flag is checked at each block boundary, blocks
    /// already handed to the OS are not aborted.
    pub fn cancel(&self) {
        self.state.cancellation_requested.store(true, Ordering::Release);
    }

    pub fn status(&self) -> AsyncStatus {
        AsyncStatus::from_raw(self.state.status.load(Ordering::Acquire))
    }
}

enum RequestKind {
    Read(AsyncReadRequest),
    ReadBlocks(AsyncBlockReadRequest),
}

struct QueueEntry {
    priority: IoPriority,
    sequence: u64,
    state: Arc<RequestState>,
    request: RequestKind,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap: highest priority first, then FIFO
        other.priority.cmp(&self.priority)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct IoShared {
    queue: SpinLock<BinaryHeap<QueueEntry>>,
    queue_event: Semaphore,
    exit_requested: AtomicBool,
    next_sequence: AtomicU32,
}

/// Asynchronous streaming I/O front-end.
///
/// One dedicated reader thread drains a priority queue of requests, touches
/// the OS, and hands decompression and callbacks over to the job system.
pub struct AsyncStreamIo {
    shared: Arc<IoShared>,
    thread: parking_lot::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AsyncStreamIo {
    pub fn new(
        job_system: Arc<JobSystem>,
        stream_factory: Arc<StreamFactory>,
    ) -> anyhow::Result<Self> {
        let shared = Arc::new(IoShared {
            queue: SpinLock::new(BinaryHeap::new()),
            queue_event: Semaphore::new(0),
            exit_requested: AtomicBool::new(false),
            next_sequence: AtomicU32::new(0),
        });

        let thread = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("Async IO".into())
                .spawn(move || reader_thread(shared, job_system, stream_factory))?
        };

        Ok(Self {
            shared,
            thread: parking_lot::Mutex::new(Some(thread)),
        })
    }

    pub fn read_async(&self, request: AsyncReadRequest, priority: IoPriority) -> AsyncController {
        self.enqueue(RequestKind::Read(request), priority)
    }

    pub fn read_blocks_async(
        &self,
        request: AsyncBlockReadRequest,
        priority: IoPriority,
    ) -> AsyncController {
        self.enqueue(RequestKind::ReadBlocks(request), priority)
    }

    pub fn stop(&self) {
        if self.shared.exit_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.queue_event.release(1);
        if let Some(thread) = self.thread.lock().take() {
            thread.join().expect("Async IO thread panicked!");
        }
    }

    fn enqueue(&self, request: RequestKind, priority: IoPriority) -> AsyncController {
        let state = RequestState::new();
        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed) as u64;

        self.shared.queue.lock().push(QueueEntry {
            priority,
            sequence,
            state: state.clone(),
            request,
        });
        self.shared.queue_event.release(1);

        AsyncController { state }
    }
}

impl Drop for AsyncStreamIo {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reader_thread(
    shared: Arc<IoShared>,
    job_system: Arc<JobSystem>,
    stream_factory: Arc<StreamFactory>,
) {
    loop {
        shared.queue_event.wait();
        if shared.exit_requested.load(Ordering::SeqCst) {
            break;
        }

        while let Some(entry) = shared.queue.lock().pop() {
            match entry.request {
                RequestKind::Read(request) => {
                    process_read(&stream_factory, &entry.state, request);
                }
                RequestKind::ReadBlocks(request) => {
                    process_block_read(&stream_factory, &job_system, &entry.state, request);
                }
            }
        }
    }

    // cancel whatever is still queued
    let mut queue = shared.queue.lock();
    while let Some(entry) = queue.pop() {
        entry.state.set_status(AsyncStatus::Cancelled);
        if let RequestKind::Read(request) = entry.request {
            (request.callback)(AsyncReadResult {
                status: AsyncStatus::Cancelled,
                data: Bytes::new(),
            });
        }
    }
}

fn process_read(stream_factory: &StreamFactory, state: &RequestState, request: AsyncReadRequest) {
    if state.is_cancelled() {
        state.set_status(AsyncStatus::Cancelled);
        (request.callback)(AsyncReadResult {
            status: AsyncStatus::Cancelled,
            data: Bytes::new(),
        });
        return;
    }

    state.set_status(AsyncStatus::InProgress);

    let result = read_range(stream_factory, &request.path, request.offset, request.size);
    match result {
        Ok(data) => {
            state.set_status(AsyncStatus::Succeeded);
            (request.callback)(AsyncReadResult {
                status: AsyncStatus::Succeeded,
                data,
            });
        }
        Err(err) => {
            log::warn!("async read of {:?} failed: {}", request.path, err);
            state.set_status(AsyncStatus::Failed);
            (request.callback)(AsyncReadResult {
                status: AsyncStatus::Failed,
                data: Bytes::new(),
            });
        }
    }
}

fn read_range(
    stream_factory: &StreamFactory,
    path: &str,
    offset: u64,
    size: Option<u64>,
) -> anyhow::Result<Bytes> {
    let mut stream = stream_factory.open(path)?;

    let length = stream.length();
    anyhow::ensure!(offset <= length, "read offset {} past the end of {:?}", offset, path);
    let size = size.unwrap_or(length - offset).min(length - offset);

    stream.seek_to(offset)?;

    let mut buffer = vec![0_u8; size as usize];
    let read = stream.read_to_buffer(&mut buffer)?;
    anyhow::ensure!(read == buffer.len(), "short read of {:?}", path);

    Ok(Bytes::from(buffer))
}

fn process_block_read(
    stream_factory: &StreamFactory,
    job_system: &Arc<JobSystem>,
    state: &Arc<RequestState>,
    request: AsyncBlockReadRequest,
) {
    state.set_status(AsyncStatus::InProgress);

    let mut stream = match stream_factory.open(&request.path) {
        Ok(stream) => stream,
        Err(err) => {
            log::warn!("async block read of {:?} failed: {}", request.path, err);
            state.set_status(AsyncStatus::Failed);
            for block_index in 0..request.blocks.len() {
                (request.callback)(BlockReadResult {
                    block_index,
                    status: AsyncStatus::Failed,
                    data: Bytes::new(),
                });
            }
            return;
        }
    };

    let remaining = Arc::new(AtomicU32::new(request.blocks.len() as u32));
    let any_failed = Arc::new(AtomicBool::new(false));

    for (block_index, block) in request.blocks.iter().copied().enumerate() {
        // cancellation is checked at each block boundary only
        if state.is_cancelled() {
            state.set_status(AsyncStatus::Cancelled);
            for cancelled_index in block_index..request.blocks.len() {
                (request.callback)(BlockReadResult {
                    block_index: cancelled_index,
                    status: AsyncStatus::Cancelled,
                    data: Bytes::new(),
                });
            }
            return;
        }

        let compressed = stream.seek_to(block.offset).and_then(|_| {
            let mut buffer = vec![0_u8; block.compressed_size as usize];
            let read = stream.read_to_buffer(&mut buffer)?;
            anyhow::ensure!(read == buffer.len(), "short read of block {}", block_index);
            Ok(Bytes::from(buffer))
        });

        let compressed = match compressed {
            Ok(compressed) => compressed,
            Err(err) => {
                log::warn!("block {} of {:?} failed: {}", block_index, request.path, err);
                any_failed.store(true, Ordering::Release);
                finish_block(
                    state, &remaining, &any_failed, &request.callback,
                    BlockReadResult {
                        block_index,
                        status: AsyncStatus::Failed,
                        data: Bytes::new(),
                    },
                );
                continue;
            }
        };

        // decompression runs on the job system, not on the reader thread
        let codec = request.codec.clone();
        let callback = request.callback.clone();
        let state = state.clone();
        let remaining = remaining.clone();
        let any_failed = any_failed.clone();

        job_system.spawn(JobPriority::Low, move || {
            let result = match codec.decode(&compressed, block.decompressed_size as usize) {
                Ok(data) => BlockReadResult {
                    block_index,
                    status: AsyncStatus::Succeeded,
                    data,
                },
                Err(err) => {
                    log::warn!("block {} decode failed: {}", block_index, err);
                    any_failed.store(true, Ordering::Release);
                    BlockReadResult {
                        block_index,
                        status: AsyncStatus::Failed,
                        data: Bytes::new(),
                    }
                }
            };

            finish_block(&state, &remaining, &any_failed, &callback, result);
        });
    }
}

fn finish_block(
    state: &RequestState,
    remaining: &AtomicU32,
    any_failed: &AtomicBool,
    callback: &Arc<dyn Fn(BlockReadResult) + Send + Sync>,
    result: BlockReadResult,
) {
    callback(result);

    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        let status = if any_failed.load(Ordering::Acquire) {
            AsyncStatus::Failed
        } else {
            AsyncStatus::Succeeded
        };
        state.set_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();

        let push = |heap: &mut BinaryHeap<QueueEntry>, priority, sequence| {
            heap.push(QueueEntry {
                priority,
                sequence,
                state: RequestState::new(),
                request: RequestKind::Read(AsyncReadRequest {
                    path: String::new(),
                    offset: 0,
                    size: None,
                    callback: Box::new(|_| {}),
                }),
            });
        };

        push(&mut heap, IoPriority::Low, 0);
        push(&mut heap, IoPriority::High, 1);
        push(&mut heap, IoPriority::Normal, 2);
        push(&mut heap, IoPriority::High, 3);

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|entry| entry.sequence)).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }

    #[test]
    fn controller_reports_cancellation() {
        let state = RequestState::new();
        let controller = AsyncController { state: state.clone() };

        assert_eq!(controller.status(), AsyncStatus::Queued);
        controller.cancel();
        assert!(state.is_cancelled());
    }
}
