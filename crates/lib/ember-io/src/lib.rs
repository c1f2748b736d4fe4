pub mod vfs;
pub mod async_io;
pub mod decompress;

pub use vfs::{FileStream, Stream, StreamFactory};
pub use async_io::{
    AsyncBlockReadRequest, AsyncController, AsyncReadRequest, AsyncReadResult, AsyncStatus,
    AsyncStreamIo, BlockRange, BlockReadResult, IoPriority,
};
pub use decompress::{BlockCodec, RawBlockCodec};
