//! User-space execution context switching.
//!
//! A context is a suspended stack: the handle is the stack pointer where the
//! callee-saved register frame was spilled. Switching stores the current
//! frame, installs the destination stack pointer and resumes whatever was
//! suspended there. No kernel transition is involved.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod x86_64;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
use x86_64 as arch;

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
use aarch64 as arch;

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("fiber context switching is only implemented for x86_64 and aarch64 linux");

/// Opaque handle to a suspended context.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ContextHandle(*mut ());

// handles travel between worker threads together with their fibers
unsafe impl Send for ContextHandle {}

impl ContextHandle {
    pub const fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// What a resumed context receives: the context we came from and a word of
/// caller data.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TransferParams {
    pub context: ContextHandle,
    pub user_data: usize,
}

/// Entry function of a fresh context. Receives the initial transfer params
/// and must never return; the stack below it has no caller frame.
pub type EntryFn = extern "C" fn(TransferParams) -> !;

/// Prepare a fresh context on the given stack. The first switch into the
/// returned handle enters `entry`.
///
/// # Safety
///
/// `stack_top` must be the one-past-the-end pointer of a writable stack that
/// stays mapped for the lifetime of the context. It is aligned down
/// internally.
pub unsafe fn prepare(stack_top: *mut u8, entry: EntryFn) -> ContextHandle {
    arch::prepare(stack_top, entry)
}

/// Suspend the current context and resume `to`, handing it `user_data`.
/// Returns when some other context switches back here.
///
/// # Safety
///
/// `to` must be a live suspended context that no other thread resumes
/// concurrently.
pub unsafe fn switch(to: ContextHandle, user_data: usize) -> TransferParams {
    debug_assert!(!to.is_null());
    arch::switch(to.0, user_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static TRACE: Cell<u32> = Cell::new(0);
    }

    extern "C" fn ping_pong_entry(mut transfer: TransferParams) -> ! {
        loop {
            TRACE.with(|trace| trace.set(trace.get() + transfer.user_data as u32));
            transfer = unsafe { switch(transfer.context, transfer.user_data + 1) };
        }
    }

    #[test]
    fn switch_round_trip() {
        let mut stack = vec![0_u8; 64 * 1024];
        let stack_top = unsafe { stack.as_mut_ptr().add(stack.len()) };

        let mut context = unsafe { prepare(stack_top, ping_pong_entry) };

        let transfer = unsafe { switch(context, 1) };
        assert_eq!(transfer.user_data, 2);
        assert_eq!(TRACE.with(|trace| trace.get()), 1);

        context = transfer.context;
        let transfer = unsafe { switch(context, 10) };
        assert_eq!(transfer.user_data, 11);
        assert_eq!(TRACE.with(|trace| trace.get()), 11);
    }
}
