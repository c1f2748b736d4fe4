use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::context::{self, ContextHandle, EntryFn, TransferParams};

pub const NORMAL_STACK_SIZE: usize = 512 * 1024;
pub const EXTENDED_STACK_SIZE: usize = 512 * 1024;
pub const NORMAL_FIBER_COUNT: usize = 128;
pub const EXTENDED_FIBER_COUNT: usize = 32;
pub const TOTAL_FIBER_COUNT: usize = NORMAL_FIBER_COUNT + EXTENDED_FIBER_COUNT;

/// Index of a fiber inside the pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FiberHandle(u32);

impl FiberHandle {
    pub const INVALID: FiberHandle = FiberHandle(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

struct FiberSlot {
    /// Resume point of the fiber. Only the worker that currently owns the
    /// fiber reads or writes this, so a plain cell is enough.
    context: Cell<ContextHandle>,
    is_free: AtomicBool,
    #[allow(dead_code)]
    debug_name: String,
}

// slots are handed between worker threads, ownership is tracked by `is_free`
unsafe impl Send for FiberSlot {}
unsafe impl Sync for FiberSlot {}

/// Preallocated pool of fiber stacks.
///
/// All stacks live in one virtual allocation, each flanked by a no-access
/// guard page. Fibers are never destroyed; a returned fiber keeps its
/// suspended resume point and continues from there when rented again.
pub struct FiberPool {
    stack_memory: *mut u8,
    stack_memory_size: usize,
    fibers: Vec<FiberSlot>,
    index_seed: AtomicU32,
}

unsafe impl Send for FiberPool {}
unsafe impl Sync for FiberPool {}

impl FiberPool {
    pub fn new(entry: EntryFn) -> Self {
        let page_size = os::page_size();

        let total_stack_size =
            NORMAL_FIBER_COUNT * NORMAL_STACK_SIZE + EXTENDED_FIBER_COUNT * EXTENDED_STACK_SIZE;
        let total_guard_size = (TOTAL_FIBER_COUNT + 1) * page_size;
        let stack_memory_size = total_stack_size + total_guard_size;

        let stack_memory = os::reserve_stack_memory(stack_memory_size);

        let mut fibers = Vec::with_capacity(TOTAL_FIBER_COUNT);
        let mut cursor = stack_memory;
        for fiber_index in 0..TOTAL_FIBER_COUNT {
            let (stack_size, debug_name) = if fiber_index < NORMAL_FIBER_COUNT {
                (NORMAL_STACK_SIZE, format!("Fiber {}", fiber_index))
            } else {
                (EXTENDED_STACK_SIZE, format!("Fiber Big {}", fiber_index - NORMAL_FIBER_COUNT))
            };

            unsafe {
                os::protect_guard_page(cursor, page_size);
                // the stack grows down from just past its allocation
                cursor = cursor.add(page_size + stack_size);
            }

            fibers.push(FiberSlot {
                context: Cell::new(unsafe { context::prepare(cursor, entry) }),
                is_free: AtomicBool::new(true),
                debug_name,
            });
        }

        unsafe {
            os::protect_guard_page(cursor, page_size);
            debug_assert_eq!(
                cursor.add(page_size) as usize,
                stack_memory as usize + stack_memory_size
            );
        }

        Self {
            stack_memory,
            stack_memory_size,
            fibers,
            index_seed: AtomicU32::new(0),
        }
    }

    /// Rent a free fiber, spinning until one is available.
    ///
    /// The scan starts at a per-call randomized index so that workers renting
    /// concurrently do not all fight over slot zero.
    pub fn rent(&self, extended: bool) -> FiberHandle {
        let (base_index, count) = if extended {
            (NORMAL_FIBER_COUNT, EXTENDED_FIBER_COUNT)
        } else {
            (0, NORMAL_FIBER_COUNT)
        };

        let seed = self.index_seed.fetch_add(1, Ordering::Relaxed);
        let index_offset = (seed as usize).wrapping_mul(0x9E37_79B9) >> 8;

        loop {
            for scan in 0..count {
                let slot_index = base_index + (scan + index_offset) % count;
                let slot = &self.fibers[slot_index];

                if !slot.is_free.load(Ordering::Relaxed) {
                    continue;
                }

                if slot.is_free
                    .compare_exchange_weak(true, false, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return FiberHandle(slot_index as u32);
                }
            }

            for _ in 0..32 {
                std::hint::spin_loop();
            }
        }
    }

    /// Return a fiber to the pool. The caller must hold no live reference to
    /// the fiber's stack anymore.
    pub fn return_fiber(&self, handle: FiberHandle) {
        debug_assert!(handle.is_valid());
        self.fibers[handle.index()].is_free.store(true, Ordering::Release);
    }

    /// Store the fresh resume point of a suspended fiber. No-op on an invalid
    /// handle so callers can pass the not-yet-assigned previous fiber.
    pub fn update(&self, handle: FiberHandle, new_context: ContextHandle) {
        if handle.is_valid() {
            self.fibers[handle.index()].context.set(new_context);
        }
    }

    /// Switch execution to the given fiber.
    ///
    /// # Safety
    ///
    /// The caller must own the fiber (rented, not concurrently resumed) and
    /// must be running on a worker whose state survives the switch.
    pub unsafe fn switch_to(&self, to: FiberHandle, user_data: usize) -> TransferParams {
        debug_assert!(to.is_valid());
        context::switch(self.fibers[to.index()].context.get(), user_data)
    }
}

impl Drop for FiberPool {
    fn drop(&mut self) {
        unsafe {
            os::release_stack_memory(self.stack_memory, self.stack_memory_size);
        }
    }
}

#[cfg(unix)]
mod os {
    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    pub fn reserve_stack_memory(size: usize) -> *mut u8 {
        let memory = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert!(memory != libc::MAP_FAILED, "Failed to reserve fiber stack memory!");
        memory as *mut u8
    }

    pub unsafe fn protect_guard_page(page: *mut u8, page_size: usize) {
        let result = libc::mprotect(page as *mut libc::c_void, page_size, libc::PROT_NONE);
        assert_eq!(result, 0, "Failed to protect fiber guard page!");
    }

    pub unsafe fn release_stack_memory(memory: *mut u8, size: usize) {
        libc::munmap(memory as *mut libc::c_void, size);
    }
}

#[cfg(windows)]
mod os {
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

    pub fn page_size() -> usize {
        unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    }

    pub fn reserve_stack_memory(size: usize) -> *mut u8 {
        let memory = unsafe {
            VirtualAlloc(std::ptr::null_mut(), size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE)
        };
        assert!(!memory.is_null(), "Failed to reserve fiber stack memory!");
        memory as *mut u8
    }

    pub unsafe fn protect_guard_page(page: *mut u8, page_size: usize) {
        let mut old = 0;
        let result = VirtualProtect(page as _, page_size, PAGE_NOACCESS, &mut old);
        assert!(result != 0, "Failed to protect fiber guard page!");
    }

    pub unsafe fn release_stack_memory(memory: *mut u8, _size: usize) {
        VirtualFree(memory as _, 0, MEM_RELEASE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn idle_entry(transfer: crate::context::TransferParams) -> ! {
        let mut transfer = transfer;
        loop {
            transfer = unsafe { crate::context::switch(transfer.context, transfer.user_data) };
        }
    }

    #[test]
    fn rent_gives_unique_fibers() {
        let pool = FiberPool::new(idle_entry);

        let a = pool.rent(false);
        let b = pool.rent(false);
        let c = pool.rent(true);

        assert!(a != b);
        assert!(a.is_valid() && b.is_valid() && c.is_valid());

        pool.return_fiber(a);
        pool.return_fiber(b);
        pool.return_fiber(c);
    }

    #[test]
    fn rented_fiber_can_be_entered() {
        let pool = FiberPool::new(idle_entry);

        let fiber = pool.rent(false);
        let transfer = unsafe { pool.switch_to(fiber, 42) };

        assert_eq!(transfer.user_data, 42);
        pool.update(fiber, transfer.context);
        pool.return_fiber(fiber);
    }
}
