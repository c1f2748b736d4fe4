use ash::vk;

use super::allocator::{self, Allocation, AllocationCreateDesc, MemoryLocation};
use super::device::ResourceId;
use super::{Device, RhiError};

#[derive(Debug)]
pub struct Buffer {
    pub raw: vk::Buffer,
    pub desc: BufferDesc,
    /// `None` for buffers bound into an externally owned memory block
    /// (transient heap slices).
    pub allocation: Option<Allocation>,
    /// Stable index into the bindless tables.
    pub resource_id: ResourceId,
}

// the mapped pointer inside the allocation is only dereferenced through
// &mut self
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.as_mut().and_then(|allocation| allocation.mapped_slice_mut())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: usize,
    pub alignment: Option<usize>,
    pub usage: vk::BufferUsageFlags,
    pub memory_location: MemoryLocation,
}

impl BufferDesc {
    pub fn new_gpu_only(size: usize, usage: vk::BufferUsageFlags) -> Self {
        BufferDesc {
            size,
            usage,
            memory_location: MemoryLocation::GpuOnly,
            alignment: None,
        }
    }

    pub fn new_cpu_to_gpu(size: usize, usage: vk::BufferUsageFlags) -> Self {
        BufferDesc {
            size,
            usage,
            memory_location: MemoryLocation::CpuToGpu,
            alignment: None,
        }
    }

    pub fn new_gpu_to_cpu(size: usize, usage: vk::BufferUsageFlags) -> Self {
        BufferDesc {
            size,
            usage,
            memory_location: MemoryLocation::GpuToCpu,
            alignment: None,
        }
    }

    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn usage_flags(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }
}

impl Device {
    pub fn create_buffer(&self, desc: BufferDesc, name: &str) -> Result<Buffer, RhiError> {
        let raw = self.create_raw_buffer(desc)?;
        let mut requirements = unsafe { self.raw.get_buffer_memory_requirements(raw) };

        if let Some(alignment) = desc.alignment {
            requirements.alignment = requirements.alignment.max(alignment as u64);
        }

        let allocation = self.global_allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: allocator::to_inner_memory_location(&desc.memory_location),
                linear: true, // buffers are always linear
            })
            .map_err(|error| RhiError::AllocationFailure {
                name: name.to_owned(),
                error,
            })?;

        unsafe {
            self.raw
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
                .expect("Failed to bind vulkan buffer memory!");
        }

        Ok(Buffer {
            raw,
            desc,
            allocation: Some(allocation),
            resource_id: self.allocate_resource_id(),
        })
    }

    /// Create a buffer bound into a caller-owned memory block at `offset`.
    /// The transient heaps use this to alias many buffers into one
    /// allocation.
    pub fn create_buffer_bound_to(
        &self,
        desc: BufferDesc,
        memory: vk::DeviceMemory,
        offset: usize,
    ) -> Result<Buffer, RhiError> {
        let raw = self.create_raw_buffer(desc)?;

        unsafe {
            self.raw.bind_buffer_memory(raw, memory, offset as u64)?;
        }

        Ok(Buffer {
            raw,
            desc,
            allocation: None,
            resource_id: self.allocate_resource_id(),
        })
    }

    pub fn buffer_memory_requirements(&self, desc: BufferDesc) -> Result<vk::MemoryRequirements, RhiError> {
        let raw = self.create_raw_buffer(desc)?;
        let requirements = unsafe { self.raw.get_buffer_memory_requirements(raw) };
        unsafe {
            self.raw.destroy_buffer(raw, None);
        }
        Ok(requirements)
    }

    pub fn destroy_buffer(&self, buffer: Buffer) {
        unsafe {
            self.raw.destroy_buffer(buffer.raw, None);
        }

        if let Some(allocation) = buffer.allocation {
            self.global_allocator
                .lock()
                .free(allocation)
                .expect("Failed to free memory of vulkan buffer!");
        }

        self.release_resource_id(buffer.resource_id);
    }

    fn create_raw_buffer(&self, desc: BufferDesc) -> Result<vk::Buffer, RhiError> {
        let create_info = vk::BufferCreateInfo {
            size: desc.size as u64,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };

        Ok(unsafe { self.raw.create_buffer(&create_info, None)? })
    }
}
