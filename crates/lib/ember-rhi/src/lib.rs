#[macro_use]
extern crate derive_builder;

pub mod backend;
pub mod transient_heap;
pub mod bindless;
pub mod copy_queue;
pub mod shader_library;
pub mod shader_compiler;

use std::sync::Arc;

use crate::backend::{Instance, Device, physical_device};

#[derive(Clone, Copy)]
pub struct RhiConfig {
    pub enable_debug: bool,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            enable_debug: cfg!(debug_assertions),
        }
    }
}

/// Facade over the vulkan backend: one instance, one picked physical device,
/// one logical device.
pub struct Rhi {
    pub device: Arc<Device>,
}

impl Rhi {
    pub fn new(config: RhiConfig) -> anyhow::Result<Self> {
        let instance = Instance::builder()
            .enable_debug(config.enable_debug)
            .build()?;

        let physical_device = Arc::new(physical_device::pick_suitable_physical_device(&instance));
        log::trace!("Selected physical device: {:?}", unsafe {
            std::ffi::CStr::from_ptr(physical_device.properties.device_name.as_ptr() as *const std::os::raw::c_char)
        });

        let device = Device::builder().build(&physical_device)?;

        Ok(Self { device })
    }

    pub fn shutdown(self) {
        self.device.wait_idle();
        self.device.report_leaked_resources();
    }
}
