use gpu_allocator::vulkan::{Allocator as VulkanAllocator, AllocatorCreateDesc as VulkanAllocatorCreateDesc,
    AllocationCreateDesc as VulkanAllocationCreateDesc, Allocation as VulkanAllocation};
use gpu_allocator::AllocatorDebugSettings as VulkanAllocatorDebugSettings;
use gpu_allocator::MemoryLocation as VulkanMemoryLocation;

pub type Allocator = VulkanAllocator;
pub type AllocatorCreateDesc = VulkanAllocatorCreateDesc;
pub type Allocation = VulkanAllocation;
pub type AllocationCreateDesc<'a> = VulkanAllocationCreateDesc<'a>;

pub type AllocatorDebugSettings = VulkanAllocatorDebugSettings;

/// Same as gpu_allocator::MemoryLocation but with Hash, so descriptor structs
/// containing it stay hashable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Let the driver decide.
    Unknown,
    /// GPU only accessible memory, where most allocations live.
    GpuOnly,
    /// Upload memory, for staging and constant buffers.
    CpuToGpu,
    /// Readback memory.
    GpuToCpu,
}

pub fn to_inner_memory_location(loc: &MemoryLocation) -> VulkanMemoryLocation {
    match loc {
        MemoryLocation::Unknown => VulkanMemoryLocation::Unknown,
        MemoryLocation::GpuOnly => VulkanMemoryLocation::GpuOnly,
        MemoryLocation::CpuToGpu => VulkanMemoryLocation::CpuToGpu,
        MemoryLocation::GpuToCpu => VulkanMemoryLocation::GpuToCpu,
    }
}
