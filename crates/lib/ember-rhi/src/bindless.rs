use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backend::{Buffer, Device, Image, ImageViewDesc, RhiError, SamplerDesc, DEVICE_FRAME_COUNT};

pub const BINDLESS_SRV_BINDING: u32 = 0;
pub const BINDLESS_UAV_BINDING: u32 = 1;
pub const BINDLESS_SAMPLER_BINDING: u32 = 2;
pub const BINDLESS_BUFFER_BINDING: u32 = 3;

const SAMPLER_TABLE_CAPACITY: u32 = 64;
const BUFFER_TABLE_CAPACITY: u32 = 16 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TableKind {
    Srv,
    Uav,
    Sampler,
    Buffer,
}

struct SlotAllocator {
    next: u32,
    free: Vec<u32>,
    capacity: u32,
}

impl SlotAllocator {
    fn new(capacity: u32) -> Self {
        Self {
            next: 0,
            free: Vec::new(),
            capacity,
        }
    }

    fn allocate(&mut self) -> Option<u32> {
        if let Some(slot) = self.free.pop() {
            return Some(slot);
        }
        if self.next >= self.capacity {
            return None;
        }

        let slot = self.next;
        self.next += 1;
        Some(slot)
    }

    fn release(&mut self, slot: u32) {
        debug_assert!(slot < self.capacity);
        self.free.push(slot);
    }
}

struct BindlessTables {
    srv: SlotAllocator,
    uav: SlotAllocator,
    sampler: SlotAllocator,
    buffer: SlotAllocator,
    /// Ring of slots released per frame; a slot re-enters its free list only
    /// after `DEVICE_FRAME_COUNT` frame fences passed over it.
    pending_free: [Vec<(TableKind, u32)>; DEVICE_FRAME_COUNT],
    frame_cursor: usize,
}

/// The global descriptor tables addressed by index from shaders.
///
/// Handles returned by `register_*` are plain `u32` slots, pushed to shaders
/// through push constants. Writers are serialized behind one lock; recorded
/// draws only read slots that were published before the frame began.
pub struct BindlessDescriptorManager {
    device: Arc<Device>,

    pub set_layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
    descriptor_pool: vk::DescriptorPool,

    tables: Mutex<BindlessTables>,
}

impl BindlessDescriptorManager {
    pub fn new(device: Arc<Device>) -> Result<Self, RhiError> {
        let image_capacity = device.max_bindless_descriptor_count();

        let bindings = [
            (BINDLESS_SRV_BINDING, vk::DescriptorType::SAMPLED_IMAGE, image_capacity),
            (BINDLESS_UAV_BINDING, vk::DescriptorType::STORAGE_IMAGE, image_capacity),
            (BINDLESS_SAMPLER_BINDING, vk::DescriptorType::SAMPLER, SAMPLER_TABLE_CAPACITY),
            (BINDLESS_BUFFER_BINDING, vk::DescriptorType::STORAGE_BUFFER, BUFFER_TABLE_CAPACITY),
        ];

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings.iter()
            .map(|&(binding, ty, count)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(count)
                    .stage_flags(vk::ShaderStageFlags::ALL)
                    .build()
            })
            .collect();

        // every table is partially bound and updated while command buffers
        // referencing other slots are still pending
        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING; 4];

        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags)
            .build();

        let set_layout = unsafe {
            device.raw.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder()
                    .bindings(&vk_bindings)
                    .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                    .push_next(&mut binding_flags_ci)
                    .build(),
                None,
            )?
        };

        let pool_sizes: Vec<vk::DescriptorPoolSize> = bindings.iter()
            .map(|&(_, ty, count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: count,
            })
            .collect();

        let descriptor_pool = unsafe {
            device.raw.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .pool_sizes(&pool_sizes)
                    .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
                    .max_sets(1)
                    .build(),
                None,
            )?
        };

        let set = unsafe {
            device.raw.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(descriptor_pool)
                    .set_layouts(std::slice::from_ref(&set_layout))
                    .build(),
            )?[0]
        };

        Ok(Self {
            device,
            set_layout,
            set,
            descriptor_pool,
            tables: Mutex::new(BindlessTables {
                srv: SlotAllocator::new(image_capacity),
                uav: SlotAllocator::new(image_capacity),
                sampler: SlotAllocator::new(SAMPLER_TABLE_CAPACITY),
                buffer: SlotAllocator::new(BUFFER_TABLE_CAPACITY),
                pending_free: std::array::from_fn(|_| Vec::new()),
                frame_cursor: 0,
            }),
        })
    }

    /// Publish a sampled-image view; returns its stable table slot, or
    /// `None` when the table is full.
    pub fn register_srv(&self, image: &Image, view_desc: &ImageViewDesc) -> Option<u32> {
        let slot = self.tables.lock().srv.allocate()?;

        let view = image.view(&self.device, view_desc).ok()?;
        self.write_image_descriptor(
            BINDLESS_SRV_BINDING,
            slot,
            view,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        Some(slot)
    }

    /// Publish a storage-image view.
    pub fn register_uav(&self, image: &Image, view_desc: &ImageViewDesc) -> Option<u32> {
        let slot = self.tables.lock().uav.allocate()?;

        let view = image.view(&self.device, view_desc).ok()?;
        self.write_image_descriptor(
            BINDLESS_UAV_BINDING,
            slot,
            view,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ImageLayout::GENERAL,
        );

        Some(slot)
    }

    pub fn register_sampler(&self, desc: SamplerDesc) -> Option<u32> {
        let slot = self.tables.lock().sampler.allocate()?;
        let sampler = self.device.get_immutable_sampler(desc);

        let image_info = vk::DescriptorImageInfo::builder().sampler(sampler).build();
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(BINDLESS_SAMPLER_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(std::slice::from_ref(&image_info))
            .build();

        unsafe {
            self.device.raw.update_descriptor_sets(std::slice::from_ref(&write), &[]);
        }

        Some(slot)
    }

    pub fn register_buffer(&self, buffer: &Buffer) -> Option<u32> {
        let slot = self.tables.lock().buffer.allocate()?;

        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer.raw)
            .offset(0)
            .range(buffer.desc.size as u64)
            .build();
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(BINDLESS_BUFFER_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_info))
            .build();

        unsafe {
            self.device.raw.update_descriptor_sets(std::slice::from_ref(&write), &[]);
        }

        Some(slot)
    }

    pub fn free_srv(&self, slot: u32) {
        self.defer_free(TableKind::Srv, slot);
    }

    pub fn free_uav(&self, slot: u32) {
        self.defer_free(TableKind::Uav, slot);
    }

    pub fn free_sampler(&self, slot: u32) {
        self.defer_free(TableKind::Sampler, slot);
    }

    pub fn free_buffer(&self, slot: u32) {
        self.defer_free(TableKind::Buffer, slot);
    }

    pub fn begin_frame(&self) {
        // nothing to do, recycling happens on close; the hook exists so the
        // frame loop reads symmetrically
    }

    /// Advance the frame ring. Slots freed `DEVICE_FRAME_COUNT` frames ago
    /// re-enter their free lists: the frame-fence wait at the top of the
    /// frame proved the GPU is done with them.
    pub fn close_frame(&self) {
        let mut tables = self.tables.lock();

        let cursor = (tables.frame_cursor + 1) % DEVICE_FRAME_COUNT;
        tables.frame_cursor = cursor;

        let recycled = std::mem::take(&mut tables.pending_free[cursor]);
        for (kind, slot) in recycled {
            match kind {
                TableKind::Srv => tables.srv.release(slot),
                TableKind::Uav => tables.uav.release(slot),
                TableKind::Sampler => tables.sampler.release(slot),
                TableKind::Buffer => tables.buffer.release(slot),
            }
        }
    }

    pub fn clean(&self) {
        unsafe {
            self.device.raw.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.raw.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }

    fn defer_free(&self, kind: TableKind, slot: u32) {
        let mut tables = self.tables.lock();
        let cursor = tables.frame_cursor;
        tables.pending_free[cursor].push((kind, slot));
    }

    fn write_image_descriptor(
        &self,
        binding: u32,
        slot: u32,
        view: vk::ImageView,
        ty: vk::DescriptorType,
        layout: vk::ImageLayout,
    ) {
        let image_info = vk::DescriptorImageInfo::builder()
            .image_view(view)
            .image_layout(layout)
            .build();
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(slot)
            .descriptor_type(ty)
            .image_info(std::slice::from_ref(&image_info))
            .build();

        unsafe {
            self.device.raw.update_descriptor_sets(std::slice::from_ref(&write), &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_allocator_recycles() {
        let mut allocator = SlotAllocator::new(2);

        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.allocate(), None);

        allocator.release(a);
        assert_eq!(allocator.allocate(), Some(a));
    }
}
