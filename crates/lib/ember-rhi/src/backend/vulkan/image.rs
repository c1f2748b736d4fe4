use std::collections::HashMap;

use ash::vk;
use parking_lot::Mutex;

use super::allocator::{self, Allocation, AllocationCreateDesc, MemoryLocation};
use super::device::ResourceId;
use super::{Device, RhiError};

// image type is associated with image view type.
// use this for both types.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ImageType {
    Tex1d = 0,
    Tex1dArray = 1,
    Tex2d = 2,
    Tex2dArray = 3,
    Tex3d = 4,
    Cube = 5,
    CubeArray = 6,
}

pub fn image_type_to_view_type(image_type: ImageType) -> vk::ImageViewType {
    match image_type {
        ImageType::Tex1d => vk::ImageViewType::TYPE_1D,
        ImageType::Tex1dArray => vk::ImageViewType::TYPE_1D_ARRAY,
        ImageType::Tex2d => vk::ImageViewType::TYPE_2D,
        ImageType::Tex2dArray => vk::ImageViewType::TYPE_2D_ARRAY,
        ImageType::Tex3d => vk::ImageViewType::TYPE_3D,
        ImageType::Cube => vk::ImageViewType::CUBE,
        ImageType::CubeArray => vk::ImageViewType::CUBE_ARRAY,
    }
}

pub struct Image {
    pub raw: vk::Image,
    /// `None` for imported images and images bound into a transient heap
    /// block.
    pub allocation: Option<Allocation>,
    pub desc: ImageDesc,
    pub views: Mutex<HashMap<ImageViewDesc, vk::ImageView>>,
    /// Stable index into the bindless tables.
    pub resource_id: ResourceId,
}

unsafe impl Send for Image {}
unsafe impl Sync for Image {}

impl Image {
    /// Get or create an image view.
    pub fn view(&self, device: &Device, view_desc: &ImageViewDesc) -> Result<vk::ImageView, RhiError> {
        let mut views = self.views.lock();

        if let Some(view) = views.get(view_desc) {
            Ok(*view)
        } else {
            let view = device.create_image_view(self.raw, &self.desc, view_desc)?;
            Ok(*views.entry(*view_desc).or_insert(view))
        }
    }

    fn populate_view_create_info(image_desc: &ImageDesc, view_desc: &ImageViewDesc) -> vk::ImageViewCreateInfo {
        vk::ImageViewCreateInfo::builder()
            .format(view_desc.format.unwrap_or(image_desc.format))
            // no swizzle
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .view_type(
                view_desc.view_type
                    .unwrap_or_else(|| image_type_to_view_type(image_desc.image_type)),
            )
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: view_desc.aspect_mask,
                base_mip_level: view_desc.base_mip_level,
                level_count: view_desc.level_count.unwrap_or(image_desc.mip_levels as u32),
                base_array_layer: 0,
                layer_count: match image_desc.image_type {
                    ImageType::Cube | ImageType::CubeArray => 6,
                    _ => 1,
                },
            })
            .build()
    }
}

impl Device {
    pub fn create_image(&self, desc: ImageDesc, name: &str) -> Result<Image, RhiError> {
        let image_ci = get_image_create_info(&desc);

        let image = unsafe { self.raw.create_image(&image_ci, None)? };
        let requirements = unsafe { self.raw.get_image_memory_requirements(image) };

        let allocation = self.global_allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: allocator::to_inner_memory_location(&MemoryLocation::GpuOnly),
                linear: false,
            })
            .map_err(|error| RhiError::AllocationFailure {
                name: name.to_owned(),
                error,
            })?;

        unsafe {
            self.raw
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .expect("Failed to bind vulkan image memory!");
        }

        Ok(Image {
            raw: image,
            allocation: Some(allocation),
            desc,
            views: Mutex::new(HashMap::new()),
            resource_id: self.allocate_resource_id(),
        })
    }

    /// Create an image bound into a caller-owned memory block at `offset`.
    pub fn create_image_bound_to(
        &self,
        desc: ImageDesc,
        memory: vk::DeviceMemory,
        offset: usize,
    ) -> Result<Image, RhiError> {
        let image_ci = get_image_create_info(&desc);
        let image = unsafe { self.raw.create_image(&image_ci, None)? };

        unsafe {
            self.raw.bind_image_memory(image, memory, offset as u64)?;
        }

        Ok(Image {
            raw: image,
            allocation: None,
            desc,
            views: Mutex::new(HashMap::new()),
            resource_id: self.allocate_resource_id(),
        })
    }

    /// Wrap an image the device does not own (e.g. a swapchain image handed
    /// in by the window system).
    pub fn import_external_image(&self, raw: vk::Image, desc: ImageDesc) -> Image {
        Image {
            raw,
            allocation: None,
            desc,
            views: Mutex::new(HashMap::new()),
            resource_id: self.allocate_resource_id(),
        }
    }

    pub fn image_memory_requirements(&self, desc: ImageDesc) -> Result<vk::MemoryRequirements, RhiError> {
        let image_ci = get_image_create_info(&desc);
        let image = unsafe { self.raw.create_image(&image_ci, None)? };
        let requirements = unsafe { self.raw.get_image_memory_requirements(image) };
        unsafe {
            self.raw.destroy_image(image, None);
        }
        Ok(requirements)
    }

    pub fn create_image_view(
        &self,
        raw: vk::Image,
        desc: &ImageDesc,
        view_desc: &ImageViewDesc,
    ) -> Result<vk::ImageView, RhiError> {
        let create_info = vk::ImageViewCreateInfo {
            image: raw,
            ..Image::populate_view_create_info(desc, view_desc)
        };

        Ok(unsafe { self.raw.create_image_view(&create_info, None)? })
    }

    pub fn destroy_image(&self, image: Image) {
        let views = image.views.into_inner();
        for (_, view) in views {
            unsafe {
                self.raw.destroy_image_view(view, None);
            }
        }

        match image.allocation {
            Some(allocation) => {
                unsafe {
                    self.raw.destroy_image(image.raw, None);
                }
                self.global_allocator
                    .lock()
                    .free(allocation)
                    .expect("Failed to free vulkan image memory!");
            }
            None => {
                // transient-heap images own their vk handle, imported images
                // do not own anything beyond the views
                unsafe {
                    self.raw.destroy_image(image.raw, None);
                }
            }
        }

        self.release_resource_id(image.resource_id);
    }

    /// Release only the bookkeeping of an imported image; the external owner
    /// keeps the vk handle.
    pub fn forget_imported_image(&self, image: Image) {
        let views = image.views.into_inner();
        for (_, view) in views {
            unsafe {
                self.raw.destroy_image_view(view, None);
            }
        }
        self.release_resource_id(image.resource_id);
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: [u32; 3],
    pub image_type: ImageType,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
    pub format: vk::Format,
    pub sample: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub array_elements: u32,
    pub mip_levels: u16,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            extent: [0, 0, 0],
            format: vk::Format::UNDEFINED,
            image_type: ImageType::Tex2d,
            // usage can be inferred from the accesses recorded in the frame
            // graph, but the user may still add flags explicitly
            usage: vk::ImageUsageFlags::default(),
            flags: vk::ImageCreateFlags::empty(),
            sample: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            array_elements: 1,
            mip_levels: 1,
        }
    }
}

impl ImageDesc {
    pub fn new_1d(extent: u32, format: vk::Format) -> Self {
        Self {
            extent: [extent, 1, 1],
            format,
            image_type: ImageType::Tex1d,
            ..Default::default()
        }
    }

    pub fn new_2d(extent: [u32; 2], format: vk::Format) -> Self {
        Self {
            extent: [extent[0], extent[1], 1],
            format,
            image_type: ImageType::Tex2d,
            ..Default::default()
        }
    }

    pub fn new_2d_array(extent: [u32; 2], format: vk::Format, array_elements: u32) -> Self {
        Self::new_2d(extent, format).array_elements(array_elements).image_type(ImageType::Tex2dArray)
    }

    pub fn new_3d(extent: [u32; 3], format: vk::Format) -> Self {
        Self {
            extent,
            format,
            image_type: ImageType::Tex3d,
            ..Default::default()
        }
    }

    pub fn new_cube(extent: u32, format: vk::Format) -> Self {
        Self {
            extent: [extent, extent, 1],
            format,
            image_type: ImageType::Cube,
            ..Default::default()
        }
        .array_elements(6)
        .create_flags(vk::ImageCreateFlags::CUBE_COMPATIBLE)
    }

    #[inline]
    pub fn array_elements(mut self, num: u32) -> Self {
        self.array_elements = num;
        self
    }

    #[inline]
    pub fn mip_levels(mut self, num: u16) -> Self {
        self.mip_levels = num;
        self
    }

    #[inline]
    pub fn create_flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn usage_flags(mut self, flags: vk::ImageUsageFlags) -> Self {
        self.usage = flags;
        self
    }

    #[inline]
    pub fn image_type(mut self, image_type: ImageType) -> Self {
        self.image_type = image_type;
        self
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Builder)]
#[builder(pattern = "owned", derive(Clone))]
pub struct ImageViewDesc {
    /// If this is None, infer from image type
    #[builder(setter(strip_option), default)]
    pub view_type: Option<vk::ImageViewType>,
    /// If this is None, use same image format for image view
    #[builder(setter(strip_option), default)]
    pub format: Option<vk::Format>,
    #[builder(default = "vk::ImageAspectFlags::COLOR")]
    pub aspect_mask: vk::ImageAspectFlags,
    #[builder(default = "0")]
    pub base_mip_level: u32,
    #[builder(default = "None")]
    pub level_count: Option<u32>,
}

impl ImageViewDesc {
    pub fn builder() -> ImageViewDescBuilder {
        Default::default()
    }
}

impl Default for ImageViewDesc {
    fn default() -> Self {
        ImageViewDescBuilder::default().build().unwrap()
    }
}

pub fn get_image_create_info(desc: &ImageDesc) -> vk::ImageCreateInfo {
    let (image_type, image_extent, image_layers) = match desc.image_type {
        ImageType::Tex1d => (
            vk::ImageType::TYPE_1D,
            vk::Extent3D {
                width: desc.extent[0],
                height: 1,
                depth: 1,
            },
            1,
        ),
        ImageType::Tex1dArray => (
            vk::ImageType::TYPE_1D,
            vk::Extent3D {
                width: desc.extent[0],
                height: 1,
                depth: 1,
            },
            desc.array_elements,
        ),
        ImageType::Tex2d => (
            vk::ImageType::TYPE_2D,
            vk::Extent3D {
                width: desc.extent[0],
                height: desc.extent[1],
                depth: 1,
            },
            1,
        ),
        ImageType::Tex2dArray => (
            vk::ImageType::TYPE_2D,
            vk::Extent3D {
                width: desc.extent[0],
                height: desc.extent[1],
                depth: 1,
            },
            desc.array_elements,
        ),
        ImageType::Tex3d => (
            vk::ImageType::TYPE_3D,
            vk::Extent3D {
                width: desc.extent[0],
                height: desc.extent[1],
                depth: desc.extent[2],
            },
            1,
        ),
        ImageType::Cube => (
            vk::ImageType::TYPE_2D,
            vk::Extent3D {
                width: desc.extent[0],
                height: desc.extent[1],
                depth: 1,
            },
            6,
        ),
        ImageType::CubeArray => (
            vk::ImageType::TYPE_2D,
            vk::Extent3D {
                width: desc.extent[0],
                height: desc.extent[1],
                depth: 1,
            },
            6 * desc.array_elements,
        ),
    };

    vk::ImageCreateInfo {
        flags: desc.flags,
        image_type,
        format: desc.format,
        extent: image_extent,
        mip_levels: desc.mip_levels as u32,
        array_layers: image_layers,
        samples: desc.sample,
        tiling: desc.tiling,
        usage: desc.usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    }
}
