use ash::vk;
use parking_lot::Mutex;

use super::{Buffer, Device, Image};

/// Anything whose destruction must wait until the GPU can no longer
/// reference it.
pub enum DisposedResource {
    Buffer(Buffer),
    Image(Image),
    Sampler(vk::Sampler),
    DescriptorPool(vk::DescriptorPool),
    DeviceMemory(vk::DeviceMemory),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
}

struct DisposeEntry {
    resource: DisposedResource,
    frames_left: u8,
}

/// Deferred-destruction queue.
///
/// An object pushed here stays alive for `frames_left` more `end_frame`
/// calls, which keeps in-flight GPU work from dangling; only then its real
/// destructor runs.
pub struct DisposeQueue {
    entries: Mutex<Vec<DisposeEntry>>,
}

impl DisposeQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, resource: DisposedResource, delay_frames: u8) {
        self.entries.lock().push(DisposeEntry {
            resource,
            frames_left: delay_frames,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Advance one frame: decrement every entry and destroy the ones whose
    /// delay ran out.
    pub(crate) fn advance_frame(&self, device: &Device) {
        let mut entries = self.entries.lock();

        let mut still_pending = Vec::with_capacity(entries.len());
        for mut entry in entries.drain(..) {
            entry.frames_left -= 1;
            if entry.frames_left == 0 {
                destroy_now(device, entry.resource);
            } else {
                still_pending.push(entry);
            }
        }

        *entries = still_pending;
    }

    /// Destroy everything immediately. Only valid after `wait_idle`.
    pub(crate) fn flush_all(&self, device: &Device) {
        let mut entries = self.entries.lock();
        for entry in entries.drain(..) {
            destroy_now(device, entry.resource);
        }
    }
}

fn destroy_now(device: &Device, resource: DisposedResource) {
    match resource {
        DisposedResource::Buffer(buffer) => device.destroy_buffer(buffer),
        DisposedResource::Image(image) => device.destroy_image(image),
        DisposedResource::Sampler(sampler) => unsafe {
            device.raw.destroy_sampler(sampler, None);
        },
        DisposedResource::DescriptorPool(pool) => unsafe {
            device.raw.destroy_descriptor_pool(pool, None);
        },
        DisposedResource::DeviceMemory(memory) => unsafe {
            device.raw.free_memory(memory, None);
        },
        DisposedResource::RenderPass(render_pass) => unsafe {
            device.raw.destroy_render_pass(render_pass, None);
        },
        DisposedResource::Framebuffer(framebuffer) => unsafe {
            device.raw.destroy_framebuffer(framebuffer, None);
        },
    }
}
