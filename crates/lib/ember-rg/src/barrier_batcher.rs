use ash::vk;

use ember_rhi::backend::{barrier, Device};

/// Accumulates resource-state transitions between passes and flushes them as
/// a single pipeline barrier.
#[derive(Default)]
pub struct ResourceBarrierBatcher {
    image_barriers: Vec<barrier::ImageBarrier>,
    buffer_barriers: Vec<barrier::BufferBarrier>,
}

impl ResourceBarrierBatcher {
    pub fn add_image(&mut self, image_barrier: barrier::ImageBarrier) {
        self.image_barriers.push(image_barrier);
    }

    pub fn add_buffer(&mut self, buffer_barrier: barrier::BufferBarrier) {
        self.buffer_barriers.push(buffer_barrier);
    }

    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.image_barriers.len() + self.buffer_barriers.len()
    }

    pub fn flush(&mut self, device: &Device, command_buffer: vk::CommandBuffer) {
        barrier::record_barriers(device, command_buffer, &self.image_barriers, &self.buffer_barriers);

        self.image_barriers.clear();
        self.buffer_barriers.clear();
    }
}
