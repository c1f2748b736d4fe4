use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk::{self, Handle};
use bytes::Bytes;
use parking_lot::Mutex;

use ember_container::{LinearAllocator, PagedByteBuffer, PagedByteReader};
use ember_job::{Semaphore, WaitGroup};

use crate::backend::vulkan::command::CommandBuffer;
use crate::backend::{barrier, Buffer, BufferDesc, Device, Image};

const STAGING_BUFFER_SIZE: usize = 16 * 1024 * 1024;

const OP_COPY_BUFFER: u32 = 0;
const OP_COPY_BUFFER_CONTINUATION: u32 = 1;
const OP_UPLOAD_BUFFER: u32 = 2;
const OP_UPLOAD_TEXTURE: u32 = 3;

/// A decoded copy command, in replay order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CopyCommand {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    },
    UploadBuffer {
        dst: vk::Buffer,
        dst_offset: usize,
        payload_index: usize,
    },
    UploadTexture {
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        mip_level: u32,
        array_layer: u32,
        extent: [u32; 3],
        payload_index: usize,
    },
}

/// Records copy/upload commands into a compact paged byte stream.
///
/// A `copy_buffer` targeting the same src/dst pair as the previous command is
/// encoded as a continuation, dropping the redundant handles.
#[derive(Default)]
pub struct AsyncCopyCommandListBuilder {
    commands: PagedByteBuffer,
    payloads: Vec<Bytes>,
    last_buffer_pair: Option<(vk::Buffer, vk::Buffer)>,
    command_count: u32,
}

impl AsyncCopyCommandListBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn command_count(&self) -> u32 {
        self.command_count
    }

    pub fn encoded_size(&self) -> usize {
        self.commands.len()
    }

    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        dst: &Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) {
        if self.last_buffer_pair == Some((src.raw, dst.raw)) {
            self.write_u32(OP_COPY_BUFFER_CONTINUATION);
        } else {
            self.write_u32(OP_COPY_BUFFER);
            self.write_u64(src.raw.as_raw());
            self.write_u64(dst.raw.as_raw());
            self.last_buffer_pair = Some((src.raw, dst.raw));
        }

        self.write_u64(src_offset as u64);
        self.write_u64(dst_offset as u64);
        self.write_u64(size as u64);
        self.command_count += 1;
    }

    /// The payload is held alive by the command list until replay completes.
    pub fn upload_buffer(&mut self, dst: &Buffer, dst_offset: usize, data: Bytes) {
        assert!(!data.is_empty());

        self.write_u32(OP_UPLOAD_BUFFER);
        self.write_u64(dst.raw.as_raw());
        self.write_u64(dst_offset as u64);
        self.write_u32(self.payloads.len() as u32);

        self.payloads.push(data);
        self.last_buffer_pair = None;
        self.command_count += 1;
    }

    pub fn upload_texture(&mut self, dst: &Image, mip_level: u32, array_layer: u32, data: Bytes) {
        assert!(!data.is_empty());
        assert!((mip_level as u16) < dst.desc.mip_levels);

        let extent = [
            (dst.desc.extent[0] >> mip_level).max(1),
            (dst.desc.extent[1] >> mip_level).max(1),
            (dst.desc.extent[2] >> mip_level).max(1),
        ];
        let aspect_mask = barrier::image_aspect_mask_from_format(dst.desc.format);

        self.write_u32(OP_UPLOAD_TEXTURE);
        self.write_u64(dst.raw.as_raw());
        self.write_u32(aspect_mask.as_raw());
        self.write_u32(mip_level);
        self.write_u32(array_layer);
        self.write_u32(extent[0]);
        self.write_u32(extent[1]);
        self.write_u32(extent[2]);
        self.write_u32(self.payloads.len() as u32);

        self.payloads.push(data);
        self.last_buffer_pair = None;
        self.command_count += 1;
    }

    /// Close the list. `signal` fires once every command finished on the GPU.
    pub fn build(self, signal: Arc<WaitGroup>) -> AsyncCopyCommandList {
        AsyncCopyCommandList {
            commands: self.commands,
            payloads: self.payloads,
            command_count: self.command_count,
            signal,
        }
    }

    fn write_u32(&mut self, value: u32) {
        self.commands.write(&value.to_le_bytes());
    }

    fn write_u64(&mut self, value: u64) {
        self.commands.write(&value.to_le_bytes());
    }
}

pub struct AsyncCopyCommandList {
    commands: PagedByteBuffer,
    payloads: Vec<Bytes>,
    command_count: u32,
    signal: Arc<WaitGroup>,
}

impl AsyncCopyCommandList {
    pub fn command_count(&self) -> u32 {
        self.command_count
    }

    pub fn payload(&self, index: usize) -> &Bytes {
        &self.payloads[index]
    }

    /// Decode back into replay order; continuations are resolved against the
    /// preceding copy.
    pub fn decode(&self) -> Vec<CopyCommand> {
        let mut reader = self.commands.reader();
        let mut decoded = Vec::with_capacity(self.command_count as usize);
        let mut last_buffer_pair: Option<(vk::Buffer, vk::Buffer)> = None;

        for _ in 0..self.command_count {
            let op = read_u32(&mut reader);
            match op {
                OP_COPY_BUFFER | OP_COPY_BUFFER_CONTINUATION => {
                    let (src, dst) = if op == OP_COPY_BUFFER {
                        let src = vk::Buffer::from_raw(read_u64(&mut reader));
                        let dst = vk::Buffer::from_raw(read_u64(&mut reader));
                        last_buffer_pair = Some((src, dst));
                        (src, dst)
                    } else {
                        last_buffer_pair.expect("Copy continuation without a preceding copy!")
                    };

                    decoded.push(CopyCommand::CopyBuffer {
                        src,
                        dst,
                        src_offset: read_u64(&mut reader) as usize,
                        dst_offset: read_u64(&mut reader) as usize,
                        size: read_u64(&mut reader) as usize,
                    });
                }
                OP_UPLOAD_BUFFER => {
                    let dst = vk::Buffer::from_raw(read_u64(&mut reader));
                    let dst_offset = read_u64(&mut reader) as usize;
                    let payload_index = read_u32(&mut reader) as usize;

                    last_buffer_pair = None;
                    decoded.push(CopyCommand::UploadBuffer {
                        dst,
                        dst_offset,
                        payload_index,
                    });
                }
                OP_UPLOAD_TEXTURE => {
                    let image = vk::Image::from_raw(read_u64(&mut reader));
                    let aspect_mask = vk::ImageAspectFlags::from_raw(read_u32(&mut reader));
                    let mip_level = read_u32(&mut reader);
                    let array_layer = read_u32(&mut reader);
                    let extent = [
                        read_u32(&mut reader),
                        read_u32(&mut reader),
                        read_u32(&mut reader),
                    ];
                    let payload_index = read_u32(&mut reader) as usize;

                    last_buffer_pair = None;
                    decoded.push(CopyCommand::UploadTexture {
                        image,
                        aspect_mask,
                        mip_level,
                        array_layer,
                        extent,
                        payload_index,
                    });
                }
                other => panic!("Invalid copy command opcode: {}", other),
            }
        }

        decoded
    }
}

fn read_u32(reader: &mut PagedByteReader) -> u32 {
    let mut bytes = [0_u8; 4];
    reader.read(&mut bytes);
    u32::from_le_bytes(bytes)
}

fn read_u64(reader: &mut PagedByteReader) -> u64 {
    let mut bytes = [0_u8; 8];
    reader.read(&mut bytes);
    u64::from_le_bytes(bytes)
}

struct CopyQueueShared {
    pending: Mutex<VecDeque<AsyncCopyCommandList>>,
    semaphore: Semaphore,
    exit_requested: AtomicBool,
}

/// Replays recorded command lists on the device's transfer queue.
///
/// A dedicated thread drains the list queue, stages upload payloads into a
/// ring and signals each list's wait group after its submission's fence
/// fired, so signal observers know the GPU finished.
pub struct AsyncCopyQueue {
    shared: Arc<CopyQueueShared>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AsyncCopyQueue {
    pub fn new(device: Arc<Device>) -> anyhow::Result<Self> {
        let shared = Arc::new(CopyQueueShared {
            pending: Mutex::new(VecDeque::new()),
            semaphore: Semaphore::new(0),
            exit_requested: AtomicBool::new(false),
        });

        let thread = {
            let shared = shared.clone();
            let staging = device.create_buffer(
                BufferDesc::new_cpu_to_gpu(STAGING_BUFFER_SIZE, vk::BufferUsageFlags::TRANSFER_SRC),
                "async copy staging",
            )?;

            std::thread::Builder::new()
                .name("Transfer Queue".into())
                .spawn(move || copy_worker(device, shared, staging))?
        };

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn submit(&self, list: AsyncCopyCommandList) {
        self.shared.pending.lock().push_back(list);
        self.shared.semaphore.release(1);
    }

    pub fn stop(&self) {
        if self.shared.exit_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.semaphore.release(1);
        if let Some(thread) = self.thread.lock().take() {
            thread.join().expect("Transfer queue thread panicked!");
        }
    }
}

impl Drop for AsyncCopyQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn copy_worker(device: Arc<Device>, shared: Arc<CopyQueueShared>, staging: Buffer) {
    let mut staging = staging;
    let staging_allocator = LinearAllocator::new(STAGING_BUFFER_SIZE);
    let cb = CommandBuffer::new(&device.raw, &device.transfer_queue.family);

    loop {
        shared.semaphore.wait();
        if shared.exit_requested.load(Ordering::SeqCst) {
            break;
        }

        while let Some(list) = shared.pending.lock().pop_front() {
            replay_command_list(&device, &cb, &mut staging, &staging_allocator, &list);
            // the fence wait inside replay proved GPU completion
            list.signal.signal();
        }
    }

    device.wait_idle();
    cb.destroy(&device.raw);
    device.destroy_buffer(staging);
}

fn replay_command_list(
    device: &Device,
    cb: &CommandBuffer,
    staging: &mut Buffer,
    staging_allocator: &LinearAllocator,
    list: &AsyncCopyCommandList,
) {
    let commands = list.decode();

    let mut batch_begun = false;
    let begin_batch = |batch_begun: &mut bool| {
        if !*batch_begun {
            unsafe {
                device.raw
                    .begin_command_buffer(
                        cb.raw,
                        &vk::CommandBufferBeginInfo::builder()
                            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                    )
                    .unwrap();
            }
            *batch_begun = true;
        }
    };

    let mut command_index = 0;
    while command_index < commands.len() {
        let command = &commands[command_index];

        match command {
            CopyCommand::CopyBuffer { src, dst, src_offset, dst_offset, size } => {
                begin_batch(&mut batch_begun);
                unsafe {
                    device.raw.cmd_copy_buffer(
                        cb.raw,
                        *src,
                        *dst,
                        &[vk::BufferCopy::builder()
                            .src_offset(*src_offset as u64)
                            .dst_offset(*dst_offset as u64)
                            .size(*size as u64)
                            .build()],
                    );
                }
                command_index += 1;
            }
            CopyCommand::UploadBuffer { dst, dst_offset, payload_index } => {
                let payload = list.payload(*payload_index);
                assert!(payload.len() <= STAGING_BUFFER_SIZE, "Upload larger than the staging ring!");

                let staging_offset = match staging_allocator.allocate(payload.len(), 16) {
                    Some(offset) => offset,
                    None => {
                        // staging ring is full, flush what we have first
                        submit_and_wait(device, cb, staging_allocator, &mut batch_begun);
                        continue;
                    }
                };

                staging.mapped_slice_mut().unwrap()
                    [staging_offset..staging_offset + payload.len()]
                    .copy_from_slice(payload);

                begin_batch(&mut batch_begun);
                unsafe {
                    device.raw.cmd_copy_buffer(
                        cb.raw,
                        staging.raw,
                        *dst,
                        &[vk::BufferCopy::builder()
                            .src_offset(staging_offset as u64)
                            .dst_offset(*dst_offset as u64)
                            .size(payload.len() as u64)
                            .build()],
                    );
                }
                command_index += 1;
            }
            CopyCommand::UploadTexture {
                image,
                aspect_mask,
                mip_level,
                array_layer,
                extent,
                payload_index,
            } => {
                let payload = list.payload(*payload_index);
                assert!(payload.len() <= STAGING_BUFFER_SIZE, "Upload larger than the staging ring!");

                let staging_offset = match staging_allocator.allocate(payload.len(), 16) {
                    Some(offset) => offset,
                    None => {
                        submit_and_wait(device, cb, staging_allocator, &mut batch_begun);
                        continue;
                    }
                };

                staging.mapped_slice_mut().unwrap()
                    [staging_offset..staging_offset + payload.len()]
                    .copy_from_slice(payload);

                begin_batch(&mut batch_begun);

                barrier::record_barriers(
                    device,
                    cb.raw,
                    &[barrier::ImageBarrier::new(
                        *image,
                        vk_sync::AccessType::Nothing,
                        vk_sync::AccessType::TransferWrite,
                        *aspect_mask,
                    )
                    .discard_contents()],
                    &[],
                );

                unsafe {
                    device.raw.cmd_copy_buffer_to_image(
                        cb.raw,
                        staging.raw,
                        *image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[vk::BufferImageCopy::builder()
                            .buffer_offset(staging_offset as u64)
                            .image_subresource(vk::ImageSubresourceLayers {
                                aspect_mask: *aspect_mask,
                                mip_level: *mip_level,
                                base_array_layer: *array_layer,
                                layer_count: 1,
                            })
                            .image_extent(vk::Extent3D {
                                width: extent[0],
                                height: extent[1],
                                depth: extent[2],
                            })
                            .build()],
                    );
                }

                // release to the graphics queue when the families differ
                let mut release = barrier::ImageBarrier::new(
                    *image,
                    vk_sync::AccessType::TransferWrite,
                    vk_sync::AccessType::AnyShaderReadSampledImageOrUniformTexelBuffer,
                    *aspect_mask,
                );
                if device.transfer_queue.family.index != device.graphics_queue.family.index {
                    release = release.queue_transfer(
                        device.transfer_queue.family.index,
                        device.graphics_queue.family.index,
                    );
                }
                barrier::record_barriers(device, cb.raw, &[release], &[]);

                command_index += 1;
            }
        }
    }

    submit_and_wait(device, cb, staging_allocator, &mut batch_begun);
}

fn submit_and_wait(
    device: &Device,
    cb: &CommandBuffer,
    staging_allocator: &LinearAllocator,
    batch_begun: &mut bool,
) {
    if !*batch_begun {
        return;
    }

    unsafe {
        device.raw.end_command_buffer(cb.raw).unwrap();
        device.raw
            .reset_fences(std::slice::from_ref(&cb.submit_done_fence))
            .unwrap();
    }

    let submit_info = vk::SubmitInfo::builder()
        .command_buffers(std::slice::from_ref(&cb.raw))
        .build();

    device.transfer_queue
        .submit(&device.raw, &[submit_info], cb.submit_done_fence)
        .expect("Failed to submit to the transfer queue!");

    unsafe {
        device.raw
            .wait_for_fences(std::slice::from_ref(&cb.submit_done_fence), true, u64::MAX)
            .unwrap();
    }

    staging_allocator.reset();
    *batch_begun = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_buffer(raw: u64, size: usize) -> Buffer {
        Buffer {
            raw: vk::Buffer::from_raw(raw),
            desc: BufferDesc::new_gpu_only(size, vk::BufferUsageFlags::TRANSFER_DST),
            allocation: None,
            resource_id: 0,
        }
    }

    #[test]
    fn upload_precedes_copy_in_replay_order() {
        let intermediate = fake_buffer(2, 256);
        let final_dst = fake_buffer(3, 256);

        let mut builder = AsyncCopyCommandListBuilder::new();
        builder.upload_buffer(&intermediate, 0, Bytes::from_static(b"payload"));
        builder.copy_buffer(&intermediate, &final_dst, 0, 0, 7);

        let list = builder.build(WaitGroup::new(1));
        let decoded = list.decode();

        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded[0], CopyCommand::UploadBuffer { .. }));
        assert!(matches!(decoded[1], CopyCommand::CopyBuffer { size: 7, .. }));
    }

    #[test]
    fn repeated_pair_encodes_as_continuation() {
        let src = fake_buffer(1, 1024);
        let dst = fake_buffer(2, 1024);
        let other = fake_buffer(3, 1024);

        let mut compact = AsyncCopyCommandListBuilder::new();
        compact.copy_buffer(&src, &dst, 0, 0, 64);
        compact.copy_buffer(&src, &dst, 64, 64, 64);
        let compact_size = compact.encoded_size();

        let mut full = AsyncCopyCommandListBuilder::new();
        full.copy_buffer(&src, &dst, 0, 0, 64);
        full.copy_buffer(&src, &other, 64, 64, 64);
        let full_size = full.encoded_size();

        assert!(compact_size < full_size);

        // both decode to two full copies
        let decoded = compact.build(WaitGroup::new(1)).decode();
        assert_eq!(
            decoded[1],
            CopyCommand::CopyBuffer {
                src: vk::Buffer::from_raw(1),
                dst: vk::Buffer::from_raw(2),
                src_offset: 64,
                dst_offset: 64,
                size: 64,
            }
        );
    }
}
