//! AAPCS64 context switch.
//!
//! Save frame layout, growing down from the context handle (= sp):
//!   [0]..[72]  x19-x28
//!   [80] x29   [88] resume address (x30)
//!   [96]..[152] d8-d15

use super::{ContextHandle, EntryFn, TransferParams};

core::arch::global_asm!(
    r#"
.text
.balign 16
.global ember_context_switch
.hidden ember_context_switch
.type ember_context_switch, %function
ember_context_switch:
    sub sp, sp, #160
    stp x19, x20, [sp, #0]
    stp x21, x22, [sp, #16]
    stp x23, x24, [sp, #32]
    stp x25, x26, [sp, #48]
    stp x27, x28, [sp, #64]
    stp x29, x30, [sp, #80]
    stp d8, d9, [sp, #96]
    stp d10, d11, [sp, #112]
    stp d12, d13, [sp, #128]
    stp d14, d15, [sp, #144]
    mov x9, sp
    mov sp, x0
    ldp x19, x20, [sp, #0]
    ldp x21, x22, [sp, #16]
    ldp x23, x24, [sp, #32]
    ldp x25, x26, [sp, #48]
    ldp x27, x28, [sp, #64]
    ldp x29, x30, [sp, #80]
    ldp d8, d9, [sp, #96]
    ldp d10, d11, [sp, #112]
    ldp d12, d13, [sp, #128]
    ldp d14, d15, [sp, #144]
    add sp, sp, #160
    mov x0, x9
    ret
.size ember_context_switch, . - ember_context_switch

.balign 16
.global ember_fiber_boot
.hidden ember_fiber_boot
.type ember_fiber_boot, %function
ember_fiber_boot:
    blr x19
    brk #0
.size ember_fiber_boot, . - ember_fiber_boot
"#
);

extern "C" {
    fn ember_context_switch(to: *mut (), user_data: usize) -> TransferParams;
    fn ember_fiber_boot();
}

pub(super) unsafe fn prepare(stack_top: *mut u8, entry: EntryFn) -> ContextHandle {
    let top = (stack_top as usize) & !15;
    let sp = (top - 160) as *mut u64;

    for slot in 0..20 {
        sp.add(slot).write(0);
    }
    sp.write(entry as usize as u64); // x19, read by the boot thunk
    sp.add(11).write(ember_fiber_boot as usize as u64); // x30

    ContextHandle(sp as *mut ())
}

#[inline]
pub(super) unsafe fn switch(to: *mut (), user_data: usize) -> TransferParams {
    ember_context_switch(to, user_data)
}
