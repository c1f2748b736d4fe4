use std::sync::Arc;
use ash::vk;

use crate::backend::vulkan::Instance;

#[derive(Copy, Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

pub struct PhysicalDevice {
    pub raw: vk::PhysicalDevice,
    pub(crate) instance: Arc<Instance>,
    pub(crate) queue_families: Vec<QueueFamily>,
    pub features: vk::PhysicalDeviceFeatures,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl PhysicalDevice {
    /// The queue family running graphics and compute work.
    pub fn graphics_queue_family(&self) -> QueueFamily {
        self.queue_families.iter()
            .find(|family| family.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .copied()
            .expect("No suitable graphics queue family!")
    }

    /// A dedicated transfer family when the hardware has one; the async copy
    /// queue falls back to the graphics family otherwise.
    pub fn transfer_queue_family(&self) -> QueueFamily {
        self.queue_families.iter()
            .find(|family| {
                family.properties.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !family.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .copied()
            .unwrap_or_else(|| self.graphics_queue_family())
    }
}

pub fn enumerate_physical_devices(instance: &Arc<Instance>) -> Vec<PhysicalDevice> {
    let physical_devices = unsafe { instance.raw.enumerate_physical_devices() }
        .expect("Failed to enumerate physical devices!");

    physical_devices.into_iter()
        .map(|pd| {
            let features = unsafe { instance.raw.get_physical_device_features(pd) };
            let properties = unsafe { instance.raw.get_physical_device_properties(pd) };
            let memory_properties = unsafe { instance.raw.get_physical_device_memory_properties(pd) };

            let queue_families: Vec<QueueFamily> = unsafe { instance.raw.get_physical_device_queue_family_properties(pd) }
                .into_iter()
                .enumerate()
                .map(|(index, properties)| QueueFamily {
                    index: index as u32,
                    properties,
                })
                .collect();

            PhysicalDevice {
                raw: pd,
                instance: instance.clone(),
                queue_families,
                features,
                properties,
                memory_properties,
            }
        })
        .collect()
}

/// The resource core assumes a single logical GPU device, so exactly one
/// physical device is picked, discrete GPUs first.
pub fn pick_suitable_physical_device(instance: &Arc<Instance>) -> PhysicalDevice {
    let physical_devices = enumerate_physical_devices(instance);

    log::trace!("All available physical devices:");
    log::trace!("{:#?}", physical_devices.iter()
        .map(|device| {
            unsafe {
                std::ffi::CStr::from_ptr(device.properties.device_name.as_ptr() as *const std::os::raw::c_char)
            }
        })
        .collect::<Vec<_>>()
    );

    physical_devices.into_iter()
        .filter(|device| {
            device.queue_families.iter().any(|queue| {
                queue.properties.queue_count > 0
                    && queue.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
        })
        .max_by_key(|device| {
            match device.properties.device_type {
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                _ => 0,
            }
        })
        .expect("Failed to find at least one suitable physical device!")
}
