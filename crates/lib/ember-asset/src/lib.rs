pub mod texture;
pub mod loader;

pub use texture::{MipChainInfo, TextureAssetHeader, TextureBlockInfo, TEXTURE_ASSET_MAGIC};
pub use loader::{TextureLoadHandle, TextureLoadStatus, TextureLoader};
