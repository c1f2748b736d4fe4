mod intrusive_list;
mod linear_allocator;
mod free_list_allocator;
mod pool_allocator;
mod lru_cache;
mod paged_buffer;
pub mod as_bytes;

pub use intrusive_list::{IntrusiveList, ListNode, Linked};
pub use linear_allocator::LinearAllocator;
pub use free_list_allocator::FreeListAllocator;
pub use pool_allocator::Pool;
pub use lru_cache::LruCache;
pub use paged_buffer::{PagedByteBuffer, PagedByteReader};
