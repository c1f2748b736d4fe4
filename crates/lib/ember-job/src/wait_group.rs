use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use ember_container::ListNode;

use crate::fiber::FiberHandle;
use crate::job::{AffinityMask, JobPriority};
use crate::system::JobSystem;

const QUEUE_LOCK_BIT: u64 = 1;

/// Bookkeeping for one suspended fiber, allocated on that fiber's own stack
/// inside [`WaitGroup::wait`].
///
/// The entry stays valid until the fiber is resumed: resuming happens only
/// after a worker observed `switch_completed`, and the stack frame is not
/// unwound before then.
#[repr(C)]
pub(crate) struct FiberWaitEntry {
    /// Link inside a ready-fiber queue once the group signals.
    pub(crate) node: ListNode,
    /// Link inside the wait-group's waiter chain.
    pub(crate) next: Cell<*mut FiberWaitEntry>,
    pub(crate) queue_tail: Cell<*mut FiberWaitEntry>,
    pub(crate) fiber: Cell<FiberHandle>,
    pub(crate) priority: JobPriority,
    pub(crate) affinity: AffinityMask,
    pub(crate) system: *const JobSystem,
    pub(crate) switch_completed: AtomicBool,
}

ember_container::impl_linked_first_field!(FiberWaitEntry);

// entries hop between the signaling thread and worker threads; every access
// after publication is synchronized through the queue lock or
// `switch_completed`
unsafe impl Send for FiberWaitEntry {}

/// Counter-plus-queue synchronization object whose waiters are fibers.
///
/// `signal()` decrements the counter; when it reaches zero every queued
/// waiter is moved to the ready-fiber queue of its priority. Waiting suspends
/// the calling fiber, never the OS thread.
pub struct WaitGroup {
    counter: AtomicI32,
    /// Low bit is a spin lock, the remaining bits hold the head pointer of
    /// the waiter chain.
    lock_and_queue: AtomicU64,
}

impl WaitGroup {
    pub fn new(counter: u32) -> Arc<Self> {
        assert!(counter <= i32::MAX as u32);

        Arc::new(Self {
            counter: AtomicI32::new(counter as i32),
            lock_and_queue: AtomicU64::new(0),
        })
    }

    /// Raise the counter before handing the group to more producers.
    pub fn add(&self, count: u32) {
        let prev = self.counter.fetch_add(count as i32, Ordering::Relaxed);
        debug_assert!(prev >= 0);
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.counter.load(Ordering::Acquire) == 0
    }

    pub fn signal(&self) {
        self.signal_many(1);
    }

    pub fn signal_many(&self, count: u32) {
        let prev = self.counter.fetch_sub(count as i32, Ordering::AcqRel);
        assert!(prev >= count as i32, "WaitGroup signaled below zero!");

        if prev == count as i32 {
            self.wake_waiters();
        }
    }

    /// Suspend the current fiber until the counter reaches zero. Returns
    /// immediately when the group is already signaled.
    ///
    /// Must be called from a worker fiber.
    pub fn wait(&self) {
        if self.is_signaled() {
            return;
        }

        let (system, worker_index) = JobSystem::current()
            .expect("WaitGroup::wait() can only be called from a worker fiber!");
        let system = unsafe { system.as_ref() };

        // take the queue lock, giving up as soon as the group signals
        let mut spin_count = 1_u32;
        loop {
            if self.counter.load(Ordering::Relaxed) == 0 {
                return;
            }
            if self.try_lock_queue() {
                break;
            }

            for _ in 0..spin_count {
                std::hint::spin_loop();
            }
            spin_count = (spin_count << 1).min(32);
        }

        let lock_and_queue = self.lock_and_queue.load(Ordering::Relaxed);

        // the final signal may have slipped in before we took the lock
        if self.is_signaled() {
            self.lock_and_queue
                .store(lock_and_queue & !QUEUE_LOCK_BIT, Ordering::Release);
            return;
        }

        let (fiber, priority, affinity) = system.worker_wait_info(worker_index);

        let entry = FiberWaitEntry {
            node: ListNode::new(),
            next: Cell::new(std::ptr::null_mut()),
            queue_tail: Cell::new(std::ptr::null_mut()),
            fiber: Cell::new(fiber),
            priority,
            affinity,
            system: system as *const JobSystem,
            switch_completed: AtomicBool::new(false),
        };
        let entry_ptr = &entry as *const FiberWaitEntry as *mut FiberWaitEntry;

        let queue_head = (lock_and_queue & !QUEUE_LOCK_BIT) as *mut FiberWaitEntry;
        if !queue_head.is_null() {
            unsafe {
                (*(*queue_head).queue_tail.get()).next.set(entry_ptr);
                (*queue_head).queue_tail.set(entry_ptr);
            }
            // head is unchanged, clearing the lock bit publishes the append
            self.lock_and_queue
                .store(lock_and_queue & !QUEUE_LOCK_BIT, Ordering::Release);
        } else {
            entry.queue_tail.set(entry_ptr);
            self.lock_and_queue.store(entry_ptr as u64, Ordering::Release);
        }

        system.switch_from_waiting_fiber(worker_index, &entry);
        // resumed: the group reached zero and a worker switched back to us
    }

    /// Spin-wait from a plain OS thread (e.g. the main thread) that has no
    /// fiber to suspend.
    pub fn wait_blocking(&self) {
        while !self.is_signaled() {
            std::thread::yield_now();
        }
    }

    fn wake_waiters(&self) {
        let mut spin_count = 1_u32;
        loop {
            if self.try_lock_queue() {
                break;
            }

            for _ in 0..spin_count {
                std::hint::spin_loop();
            }
            spin_count = (spin_count << 1).min(32);
        }

        let lock_and_queue = self.lock_and_queue.load(Ordering::Relaxed);
        if lock_and_queue == QUEUE_LOCK_BIT {
            // nobody was waiting
            self.lock_and_queue.store(0, Ordering::Release);
            return;
        }

        let mut entry = (lock_and_queue & !QUEUE_LOCK_BIT) as *mut FiberWaitEntry;
        while !entry.is_null() {
            unsafe {
                // the entry may be resumed and die as soon as it is queued,
                // read everything we need first
                let next = (*entry).next.get();
                let system = &*(*entry).system;

                system.add_ready_fiber(entry);
                entry = next;
            }
        }

        self.lock_and_queue.store(0, Ordering::Release);
    }

    fn try_lock_queue(&self) -> bool {
        let lock_and_queue = self.lock_and_queue.load(Ordering::Acquire);
        if lock_and_queue & QUEUE_LOCK_BIT != 0 {
            return false;
        }

        self.lock_and_queue
            .compare_exchange_weak(
                lock_and_queue,
                lock_and_queue | QUEUE_LOCK_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_without_waiters() {
        let group = WaitGroup::new(2);
        assert!(!group.is_signaled());

        group.signal();
        assert!(!group.is_signaled());

        group.signal();
        assert!(group.is_signaled());
    }

    #[test]
    fn add_raises_the_counter() {
        let group = WaitGroup::new(0);
        assert!(group.is_signaled());

        group.add(3);
        assert!(!group.is_signaled());

        group.signal_many(3);
        assert!(group.is_signaled());
    }

    #[test]
    #[should_panic]
    fn signaling_below_zero_asserts() {
        let group = WaitGroup::new(0);
        group.signal();
    }
}
