use ash::vk;
use vk_sync::AccessType::{self, *};

use super::Device;

#[inline]
pub fn is_read_only_access(access: &AccessType) -> bool {
    matches!(
        access,
        IndirectBuffer
            | IndexBuffer
            | VertexBuffer
            | VertexShaderReadUniformBuffer
            | VertexShaderReadSampledImageOrUniformTexelBuffer
            | VertexShaderReadOther
            | FragmentShaderReadUniformBuffer
            | FragmentShaderReadSampledImageOrUniformTexelBuffer
            | FragmentShaderReadColorInputAttachment
            | FragmentShaderReadDepthStencilInputAttachment
            | FragmentShaderReadOther
            | ColorAttachmentRead
            | DepthStencilAttachmentRead
            | ComputeShaderReadUniformBuffer
            | ComputeShaderReadSampledImageOrUniformTexelBuffer
            | ComputeShaderReadOther
            | AnyShaderReadUniformBuffer
            | AnyShaderReadUniformBufferOrVertexBuffer
            | AnyShaderReadSampledImageOrUniformTexelBuffer
            | AnyShaderReadOther
            | TransferRead
            | HostRead
            | Present
    )
}

#[inline]
pub fn is_write_access(access: &AccessType) -> bool {
    matches!(
        access,
        VertexShaderWrite
            | FragmentShaderWrite
            | ColorAttachmentWrite
            | DepthStencilAttachmentWrite
            | DepthAttachmentWriteStencilReadOnly
            | StencilAttachmentWriteDepthReadOnly
            | ComputeShaderWrite
            | AnyShaderWrite
            | TransferWrite
            | HostWrite
            | General
    )
}

#[inline]
pub fn is_raster_write_access(access: &AccessType) -> bool {
    matches!(
        access,
        ColorAttachmentWrite
            | DepthStencilAttachmentWrite
            | DepthAttachmentWriteStencilReadOnly
            | StencilAttachmentWriteDepthReadOnly
    )
}

pub struct AccessInfo {
    pub stage_mask: vk::PipelineStageFlags,
    pub access_mask: vk::AccessFlags,
    pub image_layout: vk::ImageLayout,
}

/// Stage/access/layout triple for the access types this engine emits.
pub fn get_access_info(access_type: AccessType) -> AccessInfo {
    match access_type {
        Nothing => AccessInfo {
            stage_mask: vk::PipelineStageFlags::empty(),
            access_mask: vk::AccessFlags::empty(),
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        IndirectBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::DRAW_INDIRECT,
            access_mask: vk::AccessFlags::INDIRECT_COMMAND_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        IndexBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::VERTEX_INPUT,
            access_mask: vk::AccessFlags::INDEX_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        VertexBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::VERTEX_INPUT,
            access_mask: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        VertexShaderReadUniformBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::VERTEX_SHADER,
            access_mask: vk::AccessFlags::UNIFORM_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        VertexShaderReadSampledImageOrUniformTexelBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::VERTEX_SHADER,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        FragmentShaderReadUniformBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            access_mask: vk::AccessFlags::UNIFORM_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        FragmentShaderReadSampledImageOrUniformTexelBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        FragmentShaderReadOther => AccessInfo {
            stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::GENERAL,
        },
        ColorAttachmentRead => AccessInfo {
            stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        DepthStencilAttachmentRead => AccessInfo {
            stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            image_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        },
        ComputeShaderReadUniformBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
            access_mask: vk::AccessFlags::UNIFORM_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        ComputeShaderReadSampledImageOrUniformTexelBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        ComputeShaderReadOther => AccessInfo {
            stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::GENERAL,
        },
        AnyShaderReadUniformBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::UNIFORM_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
        AnyShaderReadSampledImageOrUniformTexelBuffer => AccessInfo {
            stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        AnyShaderReadOther => AccessInfo {
            stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::GENERAL,
        },
        TransferRead => AccessInfo {
            stage_mask: vk::PipelineStageFlags::TRANSFER,
            access_mask: vk::AccessFlags::TRANSFER_READ,
            image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        },
        HostRead => AccessInfo {
            stage_mask: vk::PipelineStageFlags::HOST,
            access_mask: vk::AccessFlags::HOST_READ,
            image_layout: vk::ImageLayout::GENERAL,
        },
        Present => AccessInfo {
            stage_mask: vk::PipelineStageFlags::empty(),
            access_mask: vk::AccessFlags::empty(),
            image_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        },
        VertexShaderWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::VERTEX_SHADER,
            access_mask: vk::AccessFlags::SHADER_WRITE,
            image_layout: vk::ImageLayout::GENERAL,
        },
        FragmentShaderWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            access_mask: vk::AccessFlags::SHADER_WRITE,
            image_layout: vk::ImageLayout::GENERAL,
        },
        ColorAttachmentWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        DepthStencilAttachmentWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            image_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
        ComputeShaderWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
            access_mask: vk::AccessFlags::SHADER_WRITE,
            image_layout: vk::ImageLayout::GENERAL,
        },
        AnyShaderWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::SHADER_WRITE,
            image_layout: vk::ImageLayout::GENERAL,
        },
        TransferWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::TRANSFER,
            access_mask: vk::AccessFlags::TRANSFER_WRITE,
            image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
        HostWrite => AccessInfo {
            stage_mask: vk::PipelineStageFlags::HOST,
            access_mask: vk::AccessFlags::HOST_WRITE,
            image_layout: vk::ImageLayout::GENERAL,
        },
        General => AccessInfo {
            stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            image_layout: vk::ImageLayout::GENERAL,
        },
        other => panic!("Unsupported access type: {:?}", other),
    }
}

/// One image state transition, optionally transferring queue ownership.
#[derive(Clone, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub prev_access: AccessType,
    pub next_access: AccessType,
    pub aspect_mask: vk::ImageAspectFlags,
    /// Drop the old contents, forcing the previous layout to UNDEFINED.
    pub discard_contents: bool,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl ImageBarrier {
    pub fn new(image: vk::Image, prev_access: AccessType, next_access: AccessType, aspect_mask: vk::ImageAspectFlags) -> Self {
        Self {
            image,
            prev_access,
            next_access,
            aspect_mask,
            discard_contents: false,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    pub fn discard_contents(mut self) -> Self {
        self.discard_contents = true;
        self
    }

    pub fn queue_transfer(mut self, src_queue_family: u32, dst_queue_family: u32) -> Self {
        self.src_queue_family = src_queue_family;
        self.dst_queue_family = dst_queue_family;
        self
    }
}

/// One buffer state transition, optionally transferring queue ownership.
#[derive(Clone, Debug)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub prev_access: AccessType,
    pub next_access: AccessType,
    pub offset: usize,
    pub size: usize,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl BufferBarrier {
    pub fn new(buffer: vk::Buffer, prev_access: AccessType, next_access: AccessType, size: usize) -> Self {
        Self {
            buffer,
            prev_access,
            next_access,
            offset: 0,
            size,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    pub fn queue_transfer(mut self, src_queue_family: u32, dst_queue_family: u32) -> Self {
        self.src_queue_family = src_queue_family;
        self.dst_queue_family = dst_queue_family;
        self
    }
}

/// Record a batch of image and buffer barriers as a single pipeline barrier.
pub fn record_barriers(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image_barriers: &[ImageBarrier],
    buffer_barriers: &[BufferBarrier],
) {
    if image_barriers.is_empty() && buffer_barriers.is_empty() {
        return;
    }

    let mut src_stage_mask = vk::PipelineStageFlags::empty();
    let mut dst_stage_mask = vk::PipelineStageFlags::empty();

    let vk_image_barriers: Vec<vk::ImageMemoryBarrier> = image_barriers.iter()
        .map(|barrier| {
            let prev_info = get_access_info(barrier.prev_access);
            let next_info = get_access_info(barrier.next_access);

            src_stage_mask |= prev_info.stage_mask;
            dst_stage_mask |= next_info.stage_mask;

            let old_layout = if barrier.discard_contents {
                vk::ImageLayout::UNDEFINED
            } else {
                prev_info.image_layout
            };

            vk::ImageMemoryBarrier::builder()
                .image(barrier.image)
                .src_access_mask(prev_info.access_mask)
                .dst_access_mask(next_info.access_mask)
                .old_layout(old_layout)
                .new_layout(next_info.image_layout)
                .src_queue_family_index(barrier.src_queue_family)
                .dst_queue_family_index(barrier.dst_queue_family)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: barrier.aspect_mask,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                })
                .build()
        })
        .collect();

    let vk_buffer_barriers: Vec<vk::BufferMemoryBarrier> = buffer_barriers.iter()
        .map(|barrier| {
            let prev_info = get_access_info(barrier.prev_access);
            let next_info = get_access_info(barrier.next_access);

            src_stage_mask |= prev_info.stage_mask;
            dst_stage_mask |= next_info.stage_mask;

            vk::BufferMemoryBarrier::builder()
                .buffer(barrier.buffer)
                .src_access_mask(prev_info.access_mask)
                .dst_access_mask(next_info.access_mask)
                .src_queue_family_index(barrier.src_queue_family)
                .dst_queue_family_index(barrier.dst_queue_family)
                .offset(barrier.offset as u64)
                .size(barrier.size as u64)
                .build()
        })
        .collect();

    if src_stage_mask.is_empty() {
        src_stage_mask = vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if dst_stage_mask.is_empty() {
        dst_stage_mask = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }

    unsafe {
        device.raw.cmd_pipeline_barrier(
            command_buffer,
            src_stage_mask,
            dst_stage_mask,
            vk::DependencyFlags::empty(),
            &[],
            &vk_buffer_barriers,
            &vk_image_barriers,
        );
    }
}

/// Aspect flags a format's views and barriers should use.
pub fn image_aspect_mask_from_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_classification() {
        assert!(is_read_only_access(&AccessType::ComputeShaderReadOther));
        assert!(is_read_only_access(&AccessType::Present));
        assert!(!is_read_only_access(&AccessType::ComputeShaderWrite));

        assert!(is_write_access(&AccessType::ColorAttachmentWrite));
        assert!(is_raster_write_access(&AccessType::DepthStencilAttachmentWrite));
        assert!(!is_raster_write_access(&AccessType::TransferWrite));
    }

    #[test]
    fn transfer_layouts() {
        assert_eq!(
            get_access_info(AccessType::TransferWrite).image_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            get_access_info(AccessType::Present).image_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }
}
