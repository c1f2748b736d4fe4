use std::collections::HashMap;
use std::hash::{Hash, Hasher, BuildHasherDefault};
use std::sync::Arc;

use ash::vk;
use wyhash::WyHash;

use ember_container::{FreeListAllocator, LruCache};

use crate::backend::{
    Buffer, BufferDesc, Device, DisposedResource, Image, ImageDesc, MemoryLocation, RhiError,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransientHeapKind {
    Images,
    RenderTargets,
    Buffers,
}

#[derive(Clone, Copy)]
pub struct TransientHeapDesc {
    pub kind: TransientHeapKind,
    pub heap_size: usize,
    pub cache_capacity: usize,
}

#[derive(Clone)]
pub enum TransientResource {
    Image(Arc<Image>),
    Buffer(Arc<Buffer>),
}

struct RegisteredResourceInfo {
    resource: TransientResource,
    offset: usize,
    size: usize,
}

type WyHashMap<K, V> = HashMap<K, V, BuildHasherDefault<WyHash>>;

/// Allocator of frame-local GPU resources over one big device memory block.
///
/// Offsets come from a first-fit free list, so resources whose lifetimes do
/// not overlap within a frame alias the same bytes. Concrete vulkan objects
/// are cached by `(desc, offset)`: re-requesting the same shape at the same
/// slice re-binds the cached object instead of creating a new one.
pub struct TransientResourceHeap {
    device: Arc<Device>,
    desc: TransientHeapDesc,

    /// Backing memory, allocated lazily from the first resource's
    /// requirements so the memory type fits.
    memory: Option<vk::DeviceMemory>,
    allocator: FreeListAllocator,
    cache: LruCache<u64, TransientResource>,

    requirements_cache: WyHashMap<u64, vk::MemoryRequirements>,
    registered: HashMap<u64, RegisteredResourceInfo>,
    created_resource_count: usize,
}

impl TransientResourceHeap {
    pub fn new(device: Arc<Device>, desc: TransientHeapDesc) -> Self {
        assert!(desc.heap_size > 0 && desc.cache_capacity > 0);

        Self {
            device,
            desc,
            memory: None,
            allocator: FreeListAllocator::new(desc.heap_size),
            cache: LruCache::new(desc.cache_capacity),
            requirements_cache: Default::default(),
            registered: HashMap::new(),
            created_resource_count: 0,
        }
    }

    pub fn kind(&self) -> TransientHeapKind {
        self.desc.kind
    }

    pub fn outstanding_count(&self) -> usize {
        self.created_resource_count
    }

    /// Create (or fetch from the alias cache) a transient image bound to a
    /// slice of the heap. Returns `None` when the heap is exhausted; the
    /// caller is expected to abort the frame.
    pub fn create_image(&mut self, desc: ImageDesc, resource_id: u64) -> Option<Arc<Image>> {
        assert!(
            self.desc.kind != TransientHeapKind::Buffers,
            "Transient heap type is not compatible!"
        );

        let requirements = match self.image_requirements(desc) {
            Ok(requirements) => requirements,
            Err(err) => {
                log::warn!("failed to query transient image requirements: {}", err);
                return None;
            }
        };

        let (offset, size) = self.allocate_range(requirements)?;

        let key = desc_offset_key(&desc, offset);
        let resource = if let Some(TransientResource::Image(image)) = self.cache.get(&key) {
            image.clone()
        } else {
            let image = match self.device.create_image_bound_to(desc, self.memory.unwrap(), offset) {
                Ok(image) => Arc::new(image),
                Err(err) => {
                    log::warn!("failed to create transient image: {}", err);
                    self.allocator.deallocate(offset, size);
                    self.created_resource_count -= 1;
                    return None;
                }
            };

            self.insert_into_cache(key, TransientResource::Image(image.clone()));
            image
        };

        self.register(resource_id, TransientResource::Image(resource.clone()), offset, size);
        Some(resource)
    }

    /// Buffer flavor of [`Self::create_image`].
    pub fn create_buffer(&mut self, desc: BufferDesc, resource_id: u64) -> Option<Arc<Buffer>> {
        assert!(
            self.desc.kind == TransientHeapKind::Buffers,
            "Transient heap type is not compatible!"
        );

        let requirements = match self.buffer_requirements(desc) {
            Ok(requirements) => requirements,
            Err(err) => {
                log::warn!("failed to query transient buffer requirements: {}", err);
                return None;
            }
        };

        let (offset, size) = self.allocate_range(requirements)?;

        let key = desc_offset_key(&desc, offset);
        let resource = if let Some(TransientResource::Buffer(buffer)) = self.cache.get(&key) {
            buffer.clone()
        } else {
            let buffer = match self.device.create_buffer_bound_to(desc, self.memory.unwrap(), offset) {
                Ok(buffer) => Arc::new(buffer),
                Err(err) => {
                    log::warn!("failed to create transient buffer: {}", err);
                    self.allocator.deallocate(offset, size);
                    self.created_resource_count -= 1;
                    return None;
                }
            };

            self.insert_into_cache(key, TransientResource::Buffer(buffer.clone()));
            buffer
        };

        self.register(resource_id, TransientResource::Buffer(resource.clone()), offset, size);
        Some(resource)
    }

    pub fn release_image(&mut self, resource_id: u64) {
        self.release_resource(resource_id);
    }

    pub fn release_buffer(&mut self, resource_id: u64) {
        self.release_resource(resource_id);
    }

    /// Drop the whole cache and the backing memory block through the dispose
    /// queue.
    pub fn clean(mut self) {
        assert!(
            self.registered.is_empty(),
            "Transient heap cleaned while resources are still registered!"
        );

        for (_, resource) in self.cache.drain() {
            dispose_cached_resource(&self.device, resource);
        }

        if let Some(memory) = self.memory.take() {
            self.device.dispose(DisposedResource::DeviceMemory(memory));
        }
    }

    fn release_resource(&mut self, resource_id: u64) {
        let info = self.registered
            .remove(&resource_id)
            .expect("Transient resource was not registered!");

        self.allocator.deallocate(info.offset, info.size);

        self.created_resource_count -= 1;
        if self.created_resource_count == 0 {
            self.allocator.reset();
        }
    }

    fn allocate_range(&mut self, requirements: vk::MemoryRequirements) -> Option<(usize, usize)> {
        if self.memory.is_none() {
            let memory = self.device
                .allocate_device_memory(
                    self.desc.heap_size,
                    requirements.memory_type_bits,
                    MemoryLocation::GpuOnly,
                )
                .map_err(|err| log::warn!("failed to allocate transient heap memory: {}", err))
                .ok()?;
            self.memory = Some(memory);
        }

        let size = requirements.size as usize;
        let alignment = requirements.alignment as usize;

        match self.allocator.allocate(size, alignment) {
            Some(offset) => {
                assert!(
                    self.created_resource_count < self.cache.capacity(),
                    "Transient resource cache overflow!"
                );
                self.created_resource_count += 1;
                Some((offset, size))
            }
            None => {
                log::warn!(
                    "transient heap ({:?}) out of memory, {} bytes requested",
                    self.desc.kind, size
                );
                None
            }
        }
    }

    fn register(&mut self, resource_id: u64, resource: TransientResource, offset: usize, size: usize) {
        let old = self.registered.insert(
            resource_id,
            RegisteredResourceInfo { resource, offset, size },
        );
        assert!(old.is_none(), "Transient resource id {} registered twice!", resource_id);
    }

    fn insert_into_cache(&mut self, key: u64, resource: TransientResource) {
        if let Some(evicted) = self.cache.insert(key, resource) {
            dispose_cached_resource(&self.device, evicted);
        }
    }

    fn image_requirements(&mut self, desc: ImageDesc) -> Result<vk::MemoryRequirements, RhiError> {
        let key = desc_key(&desc);
        if let Some(requirements) = self.requirements_cache.get(&key) {
            return Ok(*requirements);
        }

        let requirements = self.device.image_memory_requirements(desc)?;
        self.requirements_cache.insert(key, requirements);
        Ok(requirements)
    }

    fn buffer_requirements(&mut self, desc: BufferDesc) -> Result<vk::MemoryRequirements, RhiError> {
        let key = desc_key(&desc);
        if let Some(requirements) = self.requirements_cache.get(&key) {
            return Ok(*requirements);
        }

        let requirements = self.device.buffer_memory_requirements(desc)?;
        self.requirements_cache.insert(key, requirements);
        Ok(requirements)
    }
}

fn dispose_cached_resource(device: &Device, resource: TransientResource) {
    match resource {
        TransientResource::Image(image) => {
            let image = Arc::try_unwrap(image)
                .unwrap_or_else(|_| panic!("Transient image still referenced outside the heap!"));
            device.dispose(DisposedResource::Image(image));
        }
        TransientResource::Buffer(buffer) => {
            let buffer = Arc::try_unwrap(buffer)
                .unwrap_or_else(|_| panic!("Transient buffer still referenced outside the heap!"));
            device.dispose(DisposedResource::Buffer(buffer));
        }
    }
}

fn desc_key<T: Hash>(desc: &T) -> u64 {
    let mut hasher = WyHash::default();
    desc.hash(&mut hasher);
    hasher.finish()
}

fn desc_offset_key<T: Hash>(desc: &T, offset: usize) -> u64 {
    let mut hasher = WyHash::default();
    desc.hash(&mut hasher);
    offset.hash(&mut hasher);
    hasher.finish()
}
