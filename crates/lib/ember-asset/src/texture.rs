use std::io::{Cursor, Read, Write};

use ash::vk;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use ember_rhi::backend::{ImageDesc, ImageType};

pub const TEXTURE_ASSET_MAGIC: u32 = u32::from_le_bytes(*b"EMTX");
pub const TEXTURE_ASSET_VERSION: u32 = 1;

/// Byte size of the fixed header at the front of every texture asset; the
/// loader's first read covers exactly this much.
pub const FIXED_HEADER_SIZE: u64 = 11 * 4;

const CHAIN_HEADER_SIZE: u64 = 2 * 4;
const BLOCK_INFO_SIZE: u64 = 3 * 8;

/// One compressed block inside the asset payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBlockInfo {
    pub offset: u64,
    pub compressed_size: u64,
    pub decompressed_size: u64,
}

/// A run of contiguous mip levels streamed together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MipChainInfo {
    pub first_mip: u32,
    pub mip_count: u32,
    /// One block per mip level, smallest offset first.
    pub blocks: Vec<TextureBlockInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureAssetHeader {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub mip_count: u32,
    /// Identifier of the block codec (0 = raw).
    pub codec: u32,
    pub mip_chains: Vec<MipChainInfo>,
}

impl TextureAssetHeader {
    pub fn image_desc(&self) -> ImageDesc {
        let image_type = if self.depth > 1 {
            ImageType::Tex3d
        } else if self.array_size > 1 {
            ImageType::Tex2dArray
        } else {
            ImageType::Tex2d
        };

        ImageDesc {
            extent: [self.width, self.height, self.depth.max(1)],
            format: self.format,
            image_type,
            array_elements: self.array_size.max(1),
            mip_levels: self.mip_count as u16,
            ..Default::default()
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> anyhow::Result<()> {
        writer.write_u32::<LittleEndian>(TEXTURE_ASSET_MAGIC)?;
        writer.write_u32::<LittleEndian>(TEXTURE_ASSET_VERSION)?;
        writer.write_u32::<LittleEndian>(self.format.as_raw() as u32)?;
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_u32::<LittleEndian>(self.height)?;
        writer.write_u32::<LittleEndian>(self.depth)?;
        writer.write_u32::<LittleEndian>(self.array_size)?;
        writer.write_u32::<LittleEndian>(self.mip_count)?;
        writer.write_u32::<LittleEndian>(self.mip_chains.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.codec)?;
        writer.write_u32::<LittleEndian>(self.chain_table_size() as u32)?;

        for chain in &self.mip_chains {
            chain.write_to(writer)?;
        }

        Ok(())
    }

    /// Byte size of the chain table between the fixed header and the first
    /// payload block.
    pub fn chain_table_size(&self) -> u64 {
        self.mip_chains.iter()
            .map(|chain| CHAIN_HEADER_SIZE + chain.blocks.len() as u64 * BLOCK_INFO_SIZE)
            .sum()
    }

    /// Parse the fixed front of the header. Returns the header with an empty
    /// chain list plus the declared chain count and chain-table byte size;
    /// the table follows in the byte stream.
    pub fn read_fixed(bytes: &[u8]) -> anyhow::Result<(TextureAssetHeader, u32, u64)> {
        anyhow::ensure!(bytes.len() >= FIXED_HEADER_SIZE as usize, "truncated texture header");
        let mut reader = Cursor::new(bytes);

        let magic = reader.read_u32::<LittleEndian>()?;
        anyhow::ensure!(magic == TEXTURE_ASSET_MAGIC, "not a texture asset (bad magic)");

        let version = reader.read_u32::<LittleEndian>()?;
        anyhow::ensure!(version == TEXTURE_ASSET_VERSION, "unsupported texture asset version {}", version);

        let format = vk::Format::from_raw(reader.read_u32::<LittleEndian>()? as i32);
        let width = reader.read_u32::<LittleEndian>()?;
        let height = reader.read_u32::<LittleEndian>()?;
        let depth = reader.read_u32::<LittleEndian>()?;
        let array_size = reader.read_u32::<LittleEndian>()?;
        let mip_count = reader.read_u32::<LittleEndian>()?;
        let mip_chain_count = reader.read_u32::<LittleEndian>()?;
        let codec = reader.read_u32::<LittleEndian>()?;
        let table_size = reader.read_u32::<LittleEndian>()? as u64;

        anyhow::ensure!(mip_count > 0, "texture asset without mip levels");

        Ok((
            TextureAssetHeader {
                format,
                width,
                height,
                depth,
                array_size,
                mip_count,
                codec,
                mip_chains: Vec::new(),
            },
            mip_chain_count,
            table_size,
        ))
    }

    /// Parse the chain table that follows the fixed header.
    pub fn read_chains(bytes: &[u8], chain_count: u32) -> anyhow::Result<Vec<MipChainInfo>> {
        let mut reader = Cursor::new(bytes);

        (0..chain_count)
            .map(|_| MipChainInfo::read_from(&mut reader))
            .collect()
    }
}

impl MipChainInfo {
    fn write_to(&self, writer: &mut impl Write) -> anyhow::Result<()> {
        assert_eq!(self.blocks.len(), self.mip_count as usize);

        writer.write_u32::<LittleEndian>(self.first_mip)?;
        writer.write_u32::<LittleEndian>(self.mip_count)?;

        for block in &self.blocks {
            writer.write_u64::<LittleEndian>(block.offset)?;
            writer.write_u64::<LittleEndian>(block.compressed_size)?;
            writer.write_u64::<LittleEndian>(block.decompressed_size)?;
        }

        Ok(())
    }

    fn read_from(reader: &mut impl Read) -> anyhow::Result<Self> {
        let first_mip = reader.read_u32::<LittleEndian>()?;
        let mip_count = reader.read_u32::<LittleEndian>()?;
        anyhow::ensure!(mip_count > 0, "empty mip chain");

        let blocks = (0..mip_count)
            .map(|_| {
                Ok(TextureBlockInfo {
                    offset: reader.read_u64::<LittleEndian>()?,
                    compressed_size: reader.read_u64::<LittleEndian>()?,
                    decompressed_size: reader.read_u64::<LittleEndian>()?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            first_mip,
            mip_count,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = [0_u8; FIXED_HEADER_SIZE as usize];
        assert!(TextureAssetHeader::read_fixed(&bytes).is_err());
    }

    #[test]
    fn header_describes_the_image() {
        let header = TextureAssetHeader {
            format: vk::Format::BC7_UNORM_BLOCK,
            width: 1024,
            height: 1024,
            depth: 1,
            array_size: 1,
            mip_count: 11,
            codec: 0,
            mip_chains: vec![MipChainInfo {
                first_mip: 0,
                mip_count: 1,
                blocks: vec![TextureBlockInfo {
                    offset: 256,
                    compressed_size: 1024 * 1024,
                    decompressed_size: 1024 * 1024,
                }],
            }],
        };

        let mut blob = Vec::new();
        header.write_to(&mut blob).unwrap();

        let (parsed, chain_count, table_size) = TextureAssetHeader::read_fixed(&blob).unwrap();
        assert_eq!(parsed.format, vk::Format::BC7_UNORM_BLOCK);
        assert_eq!(parsed.mip_count, 11);
        assert_eq!(chain_count, 1);
        assert_eq!(table_size, header.chain_table_size());
        assert_eq!(blob.len() as u64, FIXED_HEADER_SIZE + table_size);

        let chains =
            TextureAssetHeader::read_chains(&blob[FIXED_HEADER_SIZE as usize..], chain_count).unwrap();
        assert_eq!(chains, header.mip_chains);

        let desc = parsed.image_desc();
        assert_eq!(desc.extent, [1024, 1024, 1]);
        assert_eq!(desc.mip_levels, 11);
    }
}
