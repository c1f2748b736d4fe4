use ash::vk;

use super::physical_device::QueueFamily;

pub struct CommandBuffer {
    pub raw: vk::CommandBuffer,
    pub pool: vk::CommandPool,
    pub submit_done_fence: vk::Fence,
}

impl CommandBuffer {
    pub fn new(device: &ash::Device, queue_family: &QueueFamily) -> Self {
        let pool = unsafe {
            device
                .create_command_pool(
                    &vk::CommandPoolCreateInfo::builder()
                        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                        .queue_family_index(queue_family.index)
                        .build(),
                    None,
                )
                .expect("Failed to create vulkan command pool!")
        };

        let raw = unsafe {
            device
                .allocate_command_buffers(
                    &vk::CommandBufferAllocateInfo::builder()
                        .command_buffer_count(1)
                        .command_pool(pool)
                        .level(vk::CommandBufferLevel::PRIMARY)
                        .build(),
                )
                .expect("Failed to allocate vulkan command buffer!")[0]
        };

        // start signaled so the first frame does not wait forever
        let submit_done_fence = unsafe {
            device
                .create_fence(
                    &vk::FenceCreateInfo::builder()
                        .flags(vk::FenceCreateFlags::SIGNALED)
                        .build(),
                    None,
                )
                .expect("Failed to create vulkan fence!")
        };

        Self {
            raw,
            pool,
            submit_done_fence,
        }
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.submit_done_fence, None);
            device.destroy_command_pool(self.pool, None);
        }
    }
}
