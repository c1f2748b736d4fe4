use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ash::vk;
use parking_lot::Mutex;

use super::allocator::{Allocator, AllocatorCreateDesc, AllocatorDebugSettings};
use super::command::CommandBuffer;
use super::dispose::{DisposeQueue, DisposedResource};
use super::physical_device::QueueFamily;
use super::sampler::SamplerDesc;
use super::{Instance, PhysicalDevice, RhiError};

/// CPU frames in flight; deferred destruction and descriptor recycling are
/// delayed by this many frames.
pub const DEVICE_FRAME_COUNT: usize = 3;

/// Descriptor count to subtract from the max bindless descriptor count,
/// so that we don't overflow the max when using bindless _and_ non-bindless
/// descriptors in the same shader stage.
pub const RESERVED_DESCRIPTOR_COUNT: u32 = 32;

/// Stable per-device resource index, stamped at creation. Doubles as the
/// index into the bindless tables.
pub type ResourceId = u32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum QueueKind {
    Graphics,
    Transfer,
}

pub struct Queue {
    pub raw: vk::Queue,
    pub family: QueueFamily,
    pub kind: QueueKind,
    submit_lock: Mutex<()>,
}

impl Queue {
    /// Submit with external synchronization; vulkan queues are not
    /// thread-safe by themselves.
    pub fn submit(
        &self,
        device: &ash::Device,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        let _guard = self.submit_lock.lock();
        unsafe {
            device.queue_submit(self.raw, submits, fence)?;
        }
        Ok(())
    }
}

/// Monotonic id allocation with a free list.
struct ResourceIdAllocator {
    next: ResourceId,
    free: Vec<ResourceId>,
    live: u32,
}

pub struct Device {
    pub raw: ash::Device,
    // instance and physical device are only valid while the device is,
    // keep them referenced here
    pub(crate) physical_device: Arc<PhysicalDevice>,
    #[allow(dead_code)]
    pub(crate) instance: Arc<Instance>,
    pub global_allocator: Mutex<Allocator>,

    pub graphics_queue: Queue,
    pub transfer_queue: Queue,

    pub(crate) immutable_samplers: HashMap<SamplerDesc, vk::Sampler>,

    dispose_queue: DisposeQueue,
    resource_ids: Mutex<ResourceIdAllocator>,
    setup_cb: Mutex<CommandBuffer>,

    frame_fences: [vk::Fence; DEVICE_FRAME_COUNT],
    current_frame: AtomicU32,
}

impl Device {
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    pub fn wait_idle(&self) {
        unsafe {
            self.raw.device_wait_idle().expect("Failed to wait device idle!");
        }
    }

    pub fn get_device_frame_index(&self) -> u32 {
        self.current_frame.load(Ordering::Relaxed)
    }

    pub fn current_frame_fence(&self) -> vk::Fence {
        self.frame_fences[self.get_device_frame_index() as usize % DEVICE_FRAME_COUNT]
    }

    /// Wait for this frame slot's previous submission before reusing its
    /// resources.
    pub fn begin_frame(&self) {
        let fence = self.current_frame_fence();
        unsafe {
            self.raw
                .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)
                .expect("Failed to wait for frame fence!");
            self.raw
                .reset_fences(std::slice::from_ref(&fence))
                .expect("Failed to reset frame fence!");
        }
    }

    /// Advance the dispose queue and step to the next frame slot.
    pub fn end_frame(&self) {
        self.dispose_queue.advance_frame(self);
        self.current_frame.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue a GPU object for destruction `DEVICE_FRAME_COUNT` frames from
    /// now.
    pub fn dispose(&self, resource: DisposedResource) {
        self.dispose_queue.push(resource, DEVICE_FRAME_COUNT as u8);
    }

    pub fn dispose_queue(&self) -> &DisposeQueue {
        &self.dispose_queue
    }

    /// Flush everything still pending in the dispose queue. Waits for the
    /// device to go idle first.
    pub fn drain_dispose_queue(&self) {
        self.wait_idle();
        self.dispose_queue.flush_all(self);
    }

    pub(crate) fn allocate_resource_id(&self) -> ResourceId {
        let mut ids = self.resource_ids.lock();
        ids.live += 1;

        if let Some(id) = ids.free.pop() {
            return id;
        }

        let id = ids.next;
        ids.next += 1;
        id
    }

    pub(crate) fn release_resource_id(&self, id: ResourceId) {
        let mut ids = self.resource_ids.lock();
        debug_assert!(ids.live > 0);
        ids.live -= 1;
        ids.free.push(id);
    }

    pub fn live_resource_count(&self) -> u32 {
        self.resource_ids.lock().live
    }

    pub fn report_leaked_resources(&self) {
        let live = self.live_resource_count();
        if live > 0 {
            log::warn!("{} device resources were never destroyed", live);
        }
    }

    pub fn max_bindless_descriptor_count(&self) -> u32 {
        (512 * 1024).min(
            self.physical_device
                .properties
                .limits
                .max_per_stage_descriptor_sampled_images
                - RESERVED_DESCRIPTOR_COUNT,
        )
    }

    /// Record one-off setup commands and submit them on the graphics queue,
    /// waiting for completion.
    pub fn with_setup_commands(
        &self,
        callback: impl FnOnce(vk::CommandBuffer),
    ) -> Result<(), RhiError> {
        let cb = self.setup_cb.lock();

        unsafe {
            self.raw
                .begin_command_buffer(
                    cb.raw,
                    &vk::CommandBufferBeginInfo::builder()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .unwrap();
        }

        callback(cb.raw);

        unsafe {
            self.raw.end_command_buffer(cb.raw).unwrap();
        }

        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(std::slice::from_ref(&cb.raw))
            .build();

        self.graphics_queue.submit(&self.raw, &[submit_info], vk::Fence::null())?;

        unsafe {
            self.raw.device_wait_idle()?;
        }

        Ok(())
    }

    /// Raw device-memory allocation for the transient heaps. The heap binds
    /// many resources into this one block at different offsets.
    pub fn allocate_device_memory(
        &self,
        size: usize,
        memory_type_bits: u32,
        location: super::MemoryLocation,
    ) -> Result<vk::DeviceMemory, RhiError> {
        let memory_properties = &self.physical_device.memory_properties;

        let required_flags = match location {
            super::MemoryLocation::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            super::MemoryLocation::CpuToGpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            super::MemoryLocation::GpuToCpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED
            }
            super::MemoryLocation::Unknown => vk::MemoryPropertyFlags::empty(),
        };

        let memory_type_index = (0..memory_properties.memory_type_count)
            .find(|&index| {
                (memory_type_bits & (1 << index)) != 0
                    && memory_properties.memory_types[index as usize]
                        .property_flags
                        .contains(required_flags)
            })
            .ok_or(RhiError::Vulkan {
                err: vk::Result::ERROR_FEATURE_NOT_PRESENT,
            })?;

        let memory = unsafe {
            self.raw.allocate_memory(
                &vk::MemoryAllocateInfo::builder()
                    .allocation_size(size as u64)
                    .memory_type_index(memory_type_index)
                    .build(),
                None,
            )?
        };

        Ok(memory)
    }

    fn check_extensions_supported(
        required_extensions: &[&'static CStr],
        device_extensions: &HashSet<String>,
    ) {
        for ext in required_extensions {
            let ext = &*ext.to_str().unwrap();
            if !device_extensions.contains(ext) {
                panic!("Vulkan Extension {} not supported!", ext);
            }
        }
    }

    fn populate_device_queue_create_info(
        physical_device: &Arc<PhysicalDevice>,
    ) -> (Vec<vk::DeviceQueueCreateInfo>, QueueFamily, QueueFamily) {
        let graphics_family = physical_device.graphics_queue_family();
        let transfer_family = physical_device.transfer_queue_family();

        static PRIORITIES: [f32; 1] = [1.0];

        let mut queue_cis = vec![vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_family.index)
            .queue_priorities(&PRIORITIES)
            .build()];

        if transfer_family.index != graphics_family.index {
            queue_cis.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(transfer_family.index)
                    .queue_priorities(&PRIORITIES)
                    .build(),
            );
        }

        (queue_cis, graphics_family, transfer_family)
    }

    fn new(builder: DeviceBuilder, physical_device: &Arc<PhysicalDevice>) -> anyhow::Result<Self> {
        let device_extensions = unsafe {
            physical_device.instance.raw
                .enumerate_device_extension_properties(physical_device.raw)
        }
        .expect("Failed to enumerate device extensions!");

        let device_extensions: HashSet<String> = device_extensions.into_iter()
            .map(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr() as *const c_char) };
                name.to_string_lossy().into_owned()
            })
            .collect();

        let mut required_extensions = vec![
            vk::KhrMaintenance1Fn::name(),
            vk::KhrMaintenance2Fn::name(),
            vk::KhrMaintenance3Fn::name(),
        ];
        required_extensions.extend(builder.required_extensions.iter());

        Self::check_extensions_supported(&required_extensions, &device_extensions);

        let required_extensions: Vec<*const c_char> = required_extensions.into_iter()
            .map(|ext| ext.as_ptr() as *const c_char)
            .collect();

        let (queue_cis, graphics_family, transfer_family) =
            Self::populate_device_queue_create_info(physical_device);

        // bindless tables need runtime-sized, partially bound descriptor
        // arrays updated while pending
        let mut descriptor_indexing = vk::PhysicalDeviceDescriptorIndexingFeaturesEXT::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut descriptor_indexing)
            .build();

        unsafe {
            physical_device.instance.raw
                .get_physical_device_features2(physical_device.raw, &mut features2);
        }

        let device_ci = vk::DeviceCreateInfo::builder()
            .enabled_extension_names(&required_extensions)
            .queue_create_infos(&queue_cis)
            .push_next(&mut features2)
            .build();

        let device = unsafe {
            physical_device.instance.raw
                .create_device(physical_device.raw, &device_ci, None)
                .expect("Failed to create vulkan device!")
        };

        log::trace!("Vulkan device created!");

        let global_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: physical_device.instance.raw.clone(),
            device: device.clone(),
            physical_device: physical_device.raw,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
        })
        .expect("Failed to create vulkan memory allocator!");

        let graphics_queue = Queue {
            raw: unsafe { device.get_device_queue(graphics_family.index, 0) },
            family: graphics_family,
            kind: QueueKind::Graphics,
            submit_lock: Mutex::new(()),
        };
        let transfer_queue = Queue {
            raw: unsafe { device.get_device_queue(transfer_family.index, 0) },
            family: transfer_family,
            kind: QueueKind::Transfer,
            submit_lock: Mutex::new(()),
        };

        let frame_fences = std::array::from_fn(|_| unsafe {
            device
                .create_fence(
                    &vk::FenceCreateInfo::builder()
                        .flags(vk::FenceCreateFlags::SIGNALED)
                        .build(),
                    None,
                )
                .expect("Failed to create frame fence!")
        });

        let setup_cb = Mutex::new(CommandBuffer::new(&device, &graphics_family));
        let immutable_samplers = Self::create_immutable_samplers(&device);

        Ok(Self {
            raw: device,
            physical_device: physical_device.clone(),
            instance: physical_device.instance.clone(),
            global_allocator: Mutex::new(global_allocator),

            graphics_queue,
            transfer_queue,

            immutable_samplers,

            dispose_queue: DisposeQueue::new(),
            resource_ids: Mutex::new(ResourceIdAllocator {
                next: 0,
                free: Vec::new(),
                live: 0,
            }),
            setup_cb,

            frame_fences,
            current_frame: AtomicU32::new(0),
        })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.report_leaked_resources();
    }
}

pub struct DeviceBuilder {
    required_extensions: Vec<&'static CStr>,
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self {
            required_extensions: Vec::new(),
        }
    }
}

impl DeviceBuilder {
    #[allow(dead_code)]
    pub fn require_extensions(mut self, extensions: Vec<&'static CStr>) -> Self {
        self.required_extensions = extensions;
        self
    }

    pub fn build(self, physical_device: &Arc<PhysicalDevice>) -> anyhow::Result<Arc<Device>> {
        Ok(Arc::new(Device::new(self, physical_device)?))
    }
}
