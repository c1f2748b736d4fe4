use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;

use super::constants;

pub struct Instance {
    pub(crate) entry: ash::Entry,
    pub raw: ash::Instance,
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::default()
    }

    fn new(builder: InstanceBuilder) -> anyhow::Result<Self> {
        // load vulkan dll
        let entry = unsafe { ash::Entry::new()? };

        if builder.enable_debug && !Self::check_validation_layer_support(&entry) {
            log::warn!("vulkan validation layers requested but not available, running without them");
        }

        let instance = Self::create_instance(&entry, &builder);

        Ok(Self {
            entry,
            raw: instance,
        })
    }

    fn check_validation_layer_support(entry: &ash::Entry) -> bool {
        let available = entry.enumerate_instance_layer_properties().unwrap_or_default();

        constants::REQUIRED_VALIDATION_LAYERS.iter().all(|required| {
            available.iter().any(|layer| {
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name.to_string_lossy() == *required
            })
        })
    }

    fn required_layers(entry: &ash::Entry, builder: &InstanceBuilder) -> Vec<CString> {
        let mut layers = Vec::new();
        if builder.enable_debug && Self::check_validation_layer_support(entry) {
            let raw_layers = constants::REQUIRED_VALIDATION_LAYERS.iter()
                .map(|s| CString::new(*s).unwrap());
            layers.extend(raw_layers);
        }
        layers
    }

    fn create_instance(
        entry: &ash::Entry,
        builder: &InstanceBuilder,
    ) -> ash::Instance {
        let app_name = CString::new("Ember Engine").unwrap();
        let engine_name = CString::new("Ember Vulkan RenderDevice").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .api_version(vk::make_api_version(0, 1, 2, 0))
            .application_name(app_name.as_c_str())
            .engine_name(engine_name.as_c_str())
            .build();

        let extension_names: Vec<*const i8> = builder.required_extensions.iter()
            .map(|s| s.as_ptr())
            .collect();

        let layer_names = Self::required_layers(entry, builder);
        let layer_names: Vec<*const i8> = layer_names.iter()
            .map(|raw| raw.as_ptr())
            .collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .build();

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .expect("Failed to create vulkan instance!");
        log::trace!("Vulkan instance created!");

        instance
    }
}

pub struct InstanceBuilder {
    pub required_extensions: Vec<&'static CStr>,
    pub enable_debug: bool,
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        InstanceBuilder {
            required_extensions: Vec::new(),
            enable_debug: constants::ENABLE_DEBUG,
        }
    }
}

impl InstanceBuilder {
    #[allow(dead_code)]
    pub fn require_extensions(mut self, extensions: Vec<&'static CStr>) -> Self {
        self.required_extensions = extensions;
        self
    }

    pub fn enable_debug(mut self, enable: bool) -> Self {
        self.enable_debug = enable;
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<Instance>> {
        Ok(Arc::new(Instance::new(self)?))
    }
}
