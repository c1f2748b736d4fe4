use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use ember_io::{
    AsyncBlockReadRequest, AsyncReadRequest, AsyncStatus, AsyncStreamIo, BlockCodec, BlockRange,
    IoPriority, RawBlockCodec,
};
use ember_job::{JobPriority, JobSystem, WaitGroup};
use ember_rhi::backend::{Device, Image};
use ember_rhi::copy_queue::{AsyncCopyCommandListBuilder, AsyncCopyQueue};

use crate::texture::{TextureAssetHeader, FIXED_HEADER_SIZE};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum TextureLoadStatus {
    Loading = 0,
    Ready,
    Failed,
}

/// Caller-side view of one in-flight texture load.
///
/// `completion` signals once, in both directions; a failed load leaves
/// `image()` empty and the caller renders the fallback texture instead.
pub struct TextureLoadHandle {
    completion: Arc<WaitGroup>,
    status: AtomicU32,
    image: Mutex<Option<Arc<Image>>>,
}

impl TextureLoadHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            completion: WaitGroup::new(1),
            status: AtomicU32::new(TextureLoadStatus::Loading as u32),
            image: Mutex::new(None),
        })
    }

    pub fn completion(&self) -> &Arc<WaitGroup> {
        &self.completion
    }

    pub fn status(&self) -> TextureLoadStatus {
        match self.status.load(Ordering::Acquire) {
            0 => TextureLoadStatus::Loading,
            1 => TextureLoadStatus::Ready,
            _ => TextureLoadStatus::Failed,
        }
    }

    pub fn image(&self) -> Option<Arc<Image>> {
        self.image.lock().clone()
    }

    /// Idempotent; several block callbacks may race into it.
    fn fail(&self) {
        let was_loading = self.status
            .compare_exchange(
                TextureLoadStatus::Loading as u32,
                TextureLoadStatus::Failed as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if was_loading {
            self.completion.signal();
        }
    }
}

/// Streams texture assets from disk onto the GPU.
///
/// Per asset: one header read, one chain-table read, one block read per mip
/// chain, then the collected mip payloads are recorded as uploads on the
/// async copy queue. The handle's wait group fires after the GPU copy
/// completed.
pub struct TextureLoader {
    device: Arc<Device>,
    io: Arc<AsyncStreamIo>,
    copy_queue: Arc<AsyncCopyQueue>,
    job_system: Arc<JobSystem>,
}

struct LoadState {
    handle: Arc<TextureLoadHandle>,
    path: String,

    device: Arc<Device>,
    io: Arc<AsyncStreamIo>,
    copy_queue: Arc<AsyncCopyQueue>,
    job_system: Arc<JobSystem>,

    header: Mutex<Option<TextureAssetHeader>>,
    image: Mutex<Option<Arc<Image>>>,
    /// Decoded payload per mip level, filled as block reads complete.
    mip_payloads: Mutex<Vec<Option<Bytes>>>,
    pending_chains: AtomicU32,
}

impl TextureLoader {
    pub fn new(
        device: Arc<Device>,
        io: Arc<AsyncStreamIo>,
        copy_queue: Arc<AsyncCopyQueue>,
        job_system: Arc<JobSystem>,
    ) -> Self {
        Self {
            device,
            io,
            copy_queue,
            job_system,
        }
    }

    pub fn load(&self, path: &str) -> Arc<TextureLoadHandle> {
        let handle = TextureLoadHandle::new();

        let state = Arc::new(LoadState {
            handle: handle.clone(),
            path: path.to_owned(),
            device: self.device.clone(),
            io: self.io.clone(),
            copy_queue: self.copy_queue.clone(),
            job_system: self.job_system.clone(),
            header: Mutex::new(None),
            image: Mutex::new(None),
            mip_payloads: Mutex::new(Vec::new()),
            pending_chains: AtomicU32::new(0),
        });

        // step 1: the fixed header
        let request_state = state.clone();
        self.io.read_async(
            AsyncReadRequest {
                path: path.to_owned(),
                offset: 0,
                size: Some(FIXED_HEADER_SIZE),
                callback: Box::new(move |result| {
                    if result.status != AsyncStatus::Succeeded {
                        request_state.handle.fail();
                        return;
                    }
                    on_fixed_header_read(request_state, result.data);
                }),
            },
            IoPriority::Normal,
        );

        handle
    }
}

fn on_fixed_header_read(state: Arc<LoadState>, data: Bytes) {
    let (header, chain_count, table_size) = match TextureAssetHeader::read_fixed(&data) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("texture {:?}: {}", state.path, err);
            state.handle.fail();
            return;
        }
    };

    *state.header.lock() = Some(header);

    // step 2: the chain table directly follows the fixed header
    let request_state = state.clone();
    state.io.read_async(
        AsyncReadRequest {
            path: state.path.clone(),
            offset: FIXED_HEADER_SIZE,
            size: Some(table_size),
            callback: Box::new(move |result| {
                if result.status != AsyncStatus::Succeeded {
                    request_state.handle.fail();
                    return;
                }
                on_chain_table_read(request_state, result.data, chain_count);
            }),
        },
        IoPriority::Normal,
    );
}

fn on_chain_table_read(state: Arc<LoadState>, data: Bytes, chain_count: u32) {
    let chains = match TextureAssetHeader::read_chains(&data, chain_count) {
        Ok(chains) => chains,
        Err(err) => {
            log::warn!("texture {:?}: {}", state.path, err);
            state.handle.fail();
            return;
        }
    };

    let header = {
        let mut header_slot = state.header.lock();
        let header = header_slot.as_mut().unwrap();
        header.mip_chains = chains;
        header.clone()
    };

    let image = match state.device.create_image(header.image_desc(), &state.path) {
        Ok(image) => Arc::new(image),
        Err(err) => {
            log::warn!("texture {:?}: image creation failed: {}", state.path, err);
            state.handle.fail();
            return;
        }
    };
    *state.image.lock() = Some(image);
    *state.mip_payloads.lock() = vec![None; header.mip_count as usize];

    let codec: Arc<dyn BlockCodec> = Arc::new(RawBlockCodec);

    state.pending_chains.store(header.mip_chains.len() as u32, Ordering::Release);

    // step 3: one block read per mip chain
    for chain in header.mip_chains.iter().cloned() {
        let blocks: Vec<BlockRange> = chain.blocks.iter()
            .map(|block| BlockRange {
                offset: block.offset,
                compressed_size: block.compressed_size,
                decompressed_size: block.decompressed_size,
            })
            .collect();
        let block_count = blocks.len();

        let chain_first_mip = chain.first_mip;
        let chain_state = state.clone();
        let chain_remaining = Arc::new(AtomicU32::new(block_count as u32));

        state.io.read_blocks_async(
            AsyncBlockReadRequest {
                path: state.path.clone(),
                blocks,
                codec: codec.clone(),
                callback: Arc::new(move |result| {
                    if result.status != AsyncStatus::Succeeded {
                        chain_state.handle.fail();
                        return;
                    }

                    let mip_level = chain_first_mip as usize + result.block_index;
                    chain_state.mip_payloads.lock()[mip_level] = Some(result.data);

                    if chain_remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        on_chain_complete(&chain_state);
                    }
                }),
            },
            IoPriority::Normal,
        );
    }
}

/// Called once per finished chain; the last one assembles the GPU uploads.
fn on_chain_complete(state: &Arc<LoadState>) {
    if state.pending_chains.fetch_sub(1, Ordering::AcqRel) != 1 {
        return;
    }

    if state.handle.status() == TextureLoadStatus::Failed {
        return;
    }

    let image = state.image.lock().clone().unwrap();
    let payloads = std::mem::take(&mut *state.mip_payloads.lock());

    // step 4: replay everything through the async copy queue
    let mut builder = AsyncCopyCommandListBuilder::new();
    for (mip_level, payload) in payloads.into_iter().enumerate() {
        let Some(payload) = payload else {
            log::warn!("texture {:?}: mip {} never arrived", state.path, mip_level);
            state.handle.fail();
            return;
        };

        builder.upload_texture(&image, mip_level as u32, 0, payload);
    }

    let upload_done = WaitGroup::new(1);
    state.copy_queue.submit(builder.build(upload_done.clone()));

    // publish the image; sampling before `completion` fires reads garbage,
    // callers gate on the wait group
    *state.handle.image.lock() = Some(image);

    // a background fiber waits out the GPU copy and flips the handle
    let handle = state.handle.clone();
    state.job_system.spawn(JobPriority::Background, move || {
        upload_done.wait();

        let became_ready = handle.status
            .compare_exchange(
                TextureLoadStatus::Loading as u32,
                TextureLoadStatus::Ready as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if became_ready {
            handle.completion.signal();
        }
    });
}
