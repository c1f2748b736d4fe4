use thiserror::Error;

#[derive(Debug, Error)]
pub enum RhiError {
    #[error("Allocation failed for {name:?}: {error:?}")]
    AllocationFailure {
        name: String,
        error: gpu_allocator::AllocationError,
    },

    #[error("Vulkan error: {err:?}")]
    Vulkan { err: ash::vk::Result },

    #[error("Transient heap is out of memory ({requested} bytes requested)")]
    TransientHeapExhausted { requested: usize },

    #[error("Shader compilation failed: {info}")]
    ShaderCompilation { info: String },
}

impl From<ash::vk::Result> for RhiError {
    fn from(err: ash::vk::Result) -> Self {
        Self::Vulkan { err }
    }
}
