mod constants;

mod instance;
pub mod physical_device;
mod device;
mod dispose;
pub(crate) mod command;

mod allocator;
mod buffer;
mod image;
mod sampler;
mod shader;

pub mod barrier;
mod error;

pub use instance::Instance;
pub use physical_device::PhysicalDevice;
pub use device::{Device, Queue, QueueKind, ResourceId, DEVICE_FRAME_COUNT};
pub use dispose::{DisposedResource, DisposeQueue};
pub use command::CommandBuffer;

pub use allocator::MemoryLocation;
pub use buffer::{Buffer, BufferDesc};
pub use image::{Image, ImageDesc, ImageType, ImageViewDesc};
pub use sampler::SamplerDesc;
pub use shader::{ShaderBinary, ShaderStage, ShaderReflection};

pub use error::RhiError;

pub use vk_sync::AccessType;
