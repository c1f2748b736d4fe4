pub mod context;
pub mod fiber;
pub mod sync;
pub mod job;
pub mod wait_group;
pub mod system;

pub use job::{Job, JobPriority, AffinityMask};
pub use wait_group::WaitGroup;
pub use system::{JobSystem, JobSystemDesc};
pub use sync::{Semaphore, SpinLock};
