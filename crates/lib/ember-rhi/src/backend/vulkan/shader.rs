use ash::vk;
use bytes::Bytes;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

impl ShaderStage {
    pub fn target_profile(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_6_6",
            ShaderStage::Pixel => "ps_6_6",
            ShaderStage::Compute => "cs_6_6",
        }
    }

    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Compiled SPIR-V, 4-byte aligned as the compiler guarantees.
#[derive(Clone)]
pub struct ShaderBinary {
    pub spirv: Bytes,
}

impl ShaderBinary {
    pub fn as_words(&self) -> Vec<u32> {
        assert!(self.spirv.len() % 4 == 0, "SPIR-V binary is not 4-byte aligned!");

        self.spirv
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

/// Descriptor reflection extracted from a compiled module.
pub struct ShaderReflection {
    pub raw: rspirv_reflect::Reflection,
    pub push_constant_size: u32,
}
