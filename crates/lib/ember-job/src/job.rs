use std::sync::Arc;

use ember_container::ListNode;

use crate::wait_group::WaitGroup;

/// Scheduling priority, highest first.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum JobPriority {
    High = 0,
    Normal,
    Low,
    Background,
}

impl JobPriority {
    pub const COUNT: usize = 4;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => JobPriority::High,
            1 => JobPriority::Normal,
            2 => JobPriority::Low,
            3 => JobPriority::Background,
            _ => panic!("Invalid job priority index: {}", index),
        }
    }
}

/// Which workers may execute a job; bit `i` allows worker `i`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AffinityMask(pub u64);

impl AffinityMask {
    pub const ALL: AffinityMask = AffinityMask(u64::MAX);

    /// Pin to a single worker, e.g. the main-thread worker for windowing
    /// calls.
    pub fn only(worker_index: usize) -> Self {
        Self(1 << worker_index)
    }

    #[inline]
    pub fn allows(self, worker_index: usize) -> bool {
        self.0 & (1 << worker_index) != 0
    }
}

impl Default for AffinityMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// A unit of work for the job system.
///
/// Jobs are boxed once at creation and threaded through the per-priority
/// queues by their embedded list node; the queues themselves never allocate.
#[repr(C)]
pub struct Job {
    pub(crate) node: ListNode,
    pub(crate) func: Option<Box<dyn FnOnce() + Send + 'static>>,
    pub(crate) priority: JobPriority,
    pub(crate) affinity: AffinityMask,
    pub(crate) wait_group: Option<Arc<WaitGroup>>,
}

ember_container::impl_linked_first_field!(Job);

// the embedded node is only touched under the owning queue's lock
unsafe impl Send for Job {}

impl Job {
    pub fn new(
        priority: JobPriority,
        affinity: AffinityMask,
        wait_group: Option<Arc<WaitGroup>>,
        func: impl FnOnce() + Send + 'static,
    ) -> Box<Self> {
        Box::new(Self {
            node: ListNode::new(),
            func: Some(Box::new(func)),
            priority,
            affinity,
            wait_group,
        })
    }

    #[inline]
    pub fn priority(&self) -> JobPriority {
        self.priority
    }
}
