use std::sync::Arc;

use ash::vk;

use ember_rhi::backend::{CommandBuffer, Device};
use ember_rhi::bindless::BindlessDescriptorManager;
use ember_rhi::transient_heap::{TransientHeapDesc, TransientHeapKind, TransientResourceHeap};
use ember_rhi::Rhi;

use crate::execute::{ExecutionParams, TransientHeaps};
use crate::graph::FrameGraph;

#[derive(Clone, Copy)]
pub struct GraphExecutorDesc {
    pub image_heap_size: usize,
    pub render_target_heap_size: usize,
    pub buffer_heap_size: usize,
    pub transient_cache_capacity: usize,
}

impl Default for GraphExecutorDesc {
    fn default() -> Self {
        Self {
            image_heap_size: 256 * 1024 * 1024,
            render_target_heap_size: 128 * 1024 * 1024,
            buffer_heap_size: 64 * 1024 * 1024,
            transient_cache_capacity: 256,
        }
    }
}

/// Owns everything one frame graph consumer needs across frames: the
/// transient heaps, the frame command buffer and the per-frame build →
/// compile → execute cycle.
pub struct GraphExecutor {
    device: Arc<Device>,
    bindless: Arc<BindlessDescriptorManager>,

    heaps: TransientHeaps,
    main_cb: CommandBuffer,
}

impl GraphExecutor {
    pub fn new(rhi: &Rhi, bindless: Arc<BindlessDescriptorManager>, desc: GraphExecutorDesc) -> Self {
        let device = rhi.device.clone();

        let heaps = TransientHeaps {
            images: TransientResourceHeap::new(
                device.clone(),
                TransientHeapDesc {
                    kind: TransientHeapKind::Images,
                    heap_size: desc.image_heap_size,
                    cache_capacity: desc.transient_cache_capacity,
                },
            ),
            render_targets: TransientResourceHeap::new(
                device.clone(),
                TransientHeapDesc {
                    kind: TransientHeapKind::RenderTargets,
                    heap_size: desc.render_target_heap_size,
                    cache_capacity: desc.transient_cache_capacity,
                },
            ),
            buffers: TransientResourceHeap::new(
                device.clone(),
                TransientHeapDesc {
                    kind: TransientHeapKind::Buffers,
                    heap_size: desc.buffer_heap_size,
                    cache_capacity: desc.transient_cache_capacity,
                },
            ),
        };

        let main_cb = CommandBuffer::new(&device.raw, &device.graphics_queue.family);

        Self {
            device,
            bindless,
            heaps,
            main_cb,
        }
    }

    /// Run one frame: let `prepare` register passes, compile the graph,
    /// record and submit it, then retire the frame.
    ///
    /// A failed frame (e.g. transient heap exhaustion) is logged and
    /// dropped; the device still advances so later frames are unaffected.
    pub fn draw<PrepareFn>(&mut self, prepare: PrepareFn) -> anyhow::Result<()>
    where
        PrepareFn: FnOnce(&mut FrameGraph),
    {
        self.device.begin_frame();
        self.bindless.begin_frame();

        let mut graph = FrameGraph::new();
        prepare(&mut graph);

        let compiled = graph.compile();

        unsafe {
            self.device.raw
                .reset_command_buffer(self.main_cb.raw, vk::CommandBufferResetFlags::default())
                .unwrap();
            self.device.raw
                .begin_command_buffer(
                    self.main_cb.raw,
                    &vk::CommandBufferBeginInfo::builder()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                        .build(),
                )
                .unwrap();
        }

        let record_result = compiled.record(
            &self.main_cb,
            ExecutionParams {
                device: &self.device,
                bindless: self.bindless.as_ref(),
            },
            &mut self.heaps,
        );

        unsafe {
            self.device.raw.end_command_buffer(self.main_cb.raw).unwrap();
        }

        let frame_fence = self.device.current_frame_fence();
        match &record_result {
            Ok(()) => {
                let submit_info = vk::SubmitInfo::builder()
                    .command_buffers(std::slice::from_ref(&self.main_cb.raw))
                    .build();

                self.device.graphics_queue.submit(&self.device.raw, &[submit_info], frame_fence)?;
            }
            Err(err) => {
                log::warn!("frame aborted: {}", err);

                // the frame slot still has to signal, or the next frame at
                // this slot waits forever
                self.device.graphics_queue.submit(&self.device.raw, &[], frame_fence)?;
            }
        }

        self.bindless.close_frame();
        self.device.end_frame();

        record_result.map_err(Into::into)
    }

    pub fn shutdown(self) {
        self.device.wait_idle();

        self.heaps.images.clean();
        self.heaps.render_targets.clean();
        self.heaps.buffers.clean();

        self.main_cb.destroy(&self.device.raw);
        self.device.drain_dispose_queue();
    }
}
