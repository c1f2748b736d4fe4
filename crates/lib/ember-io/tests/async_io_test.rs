use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use ember_io::{
    AsyncBlockReadRequest, AsyncReadRequest, AsyncStatus, AsyncStreamIo, BlockRange, IoPriority,
    RawBlockCodec, StreamFactory,
};
use ember_job::{JobSystem, JobSystemDesc};

fn write_fixture(name: &str, contents: &[u8]) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("ember_io_async_test");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), contents).unwrap();
    dir
}

fn wait_for(controller: &ember_io::AsyncController, expected: AsyncStatus) {
    let mut spins = 0_u64;
    loop {
        let status = controller.status();
        if status == expected {
            return;
        }
        assert!(
            matches!(status, AsyncStatus::Queued | AsyncStatus::InProgress),
            "unexpected terminal status {:?}", status
        );

        std::thread::yield_now();
        spins += 1;
        assert!(spins < 100_000_000, "async request never completed");
    }
}

#[test]
fn whole_file_read_delivers_data() {
    let root = write_fixture("whole.bin", b"streaming payload");

    let job_system = JobSystem::new(JobSystemDesc { worker_count: 2 });
    job_system.start();

    let io = AsyncStreamIo::new(job_system.clone(), Arc::new(StreamFactory::new(&root))).unwrap();

    let received: Arc<Mutex<Option<Bytes>>> = Default::default();
    let controller = {
        let received = received.clone();
        io.read_async(
            AsyncReadRequest {
                path: "whole.bin".into(),
                offset: 0,
                size: None,
                callback: Box::new(move |result| {
                    assert_eq!(result.status, AsyncStatus::Succeeded);
                    *received.lock() = Some(result.data);
                }),
            },
            IoPriority::Normal,
        )
    };

    wait_for(&controller, AsyncStatus::Succeeded);
    assert_eq!(received.lock().as_deref(), Some(b"streaming payload".as_slice()));

    io.stop();
    job_system.stop();
}

#[test]
fn missing_file_reports_failed() {
    let root = write_fixture("present.bin", b"x");

    let job_system = JobSystem::new(JobSystemDesc { worker_count: 1 });
    job_system.start();

    let io = AsyncStreamIo::new(job_system.clone(), Arc::new(StreamFactory::new(&root))).unwrap();

    let failed_deliveries = Arc::new(AtomicU32::new(0));
    let controller = {
        let failed_deliveries = failed_deliveries.clone();
        io.read_async(
            AsyncReadRequest {
                path: "not_there.bin".into(),
                offset: 0,
                size: None,
                callback: Box::new(move |result| {
                    assert_eq!(result.status, AsyncStatus::Failed);
                    assert!(result.data.is_empty());
                    failed_deliveries.fetch_add(1, Ordering::Relaxed);
                }),
            },
            IoPriority::High,
        )
    };

    wait_for(&controller, AsyncStatus::Failed);
    assert_eq!(failed_deliveries.load(Ordering::Relaxed), 1);

    io.stop();
    job_system.stop();
}

#[test]
fn block_read_decodes_on_workers() {
    let root = write_fixture("blocks.bin", b"AAAABBBBBBBB");

    let job_system = JobSystem::new(JobSystemDesc { worker_count: 2 });
    job_system.start();

    let io = AsyncStreamIo::new(job_system.clone(), Arc::new(StreamFactory::new(&root))).unwrap();

    let results: Arc<Mutex<Vec<(usize, Bytes)>>> = Default::default();
    let controller = {
        let results = results.clone();
        io.read_blocks_async(
            AsyncBlockReadRequest {
                path: "blocks.bin".into(),
                blocks: vec![
                    BlockRange { offset: 0, compressed_size: 4, decompressed_size: 4 },
                    BlockRange { offset: 4, compressed_size: 8, decompressed_size: 8 },
                ],
                codec: Arc::new(RawBlockCodec),
                callback: Arc::new(move |result| {
                    assert_eq!(result.status, AsyncStatus::Succeeded);
                    results.lock().push((result.block_index, result.data));
                }),
            },
            IoPriority::Normal,
        )
    };

    wait_for(&controller, AsyncStatus::Succeeded);

    let mut results = results.lock().clone();
    results.sort_by_key(|(block_index, _)| *block_index);

    assert_eq!(results.len(), 2);
    assert_eq!(&results[0].1[..], b"AAAA");
    assert_eq!(&results[1].1[..], b"BBBBBBBB");

    io.stop();
    job_system.stop();
}
