//! System V x86_64 context switch.
//!
//! Save frame layout, growing down from the context handle (= rsp):
//!   [0]  mxcsr / x87 control word
//!   [8]  r15  [16] r14  [24] r13  [32] r12  [40] rbx  [48] rbp
//!   [56] resume address

use super::{ContextHandle, EntryFn, TransferParams};

core::arch::global_asm!(
    r#"
.text
.balign 16
.global ember_context_switch
.hidden ember_context_switch
.type ember_context_switch, @function
ember_context_switch:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15
    sub rsp, 8
    stmxcsr [rsp]
    fnstcw [rsp + 4]
    mov rax, rsp
    mov rsp, rdi
    ldmxcsr [rsp]
    fldcw [rsp + 4]
    add rsp, 8
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    mov rdx, rsi
    ret
.size ember_context_switch, . - ember_context_switch

.balign 16
.global ember_fiber_boot
.hidden ember_fiber_boot
.type ember_fiber_boot, @function
ember_fiber_boot:
    mov rdi, rax
    mov rsi, rdx
    xor ebp, ebp
    call r12
    ud2
.size ember_fiber_boot, . - ember_fiber_boot
"#
);

extern "C" {
    fn ember_context_switch(to: *mut (), user_data: usize) -> TransferParams;
    fn ember_fiber_boot();
}

pub(super) unsafe fn prepare(stack_top: *mut u8, entry: EntryFn) -> ContextHandle {
    let top = (stack_top as usize) & !15;
    let sp = (top - 64) as *mut u64;

    // default mxcsr (0x1F80) and x87 control word (0x037F)
    sp.write(0x0000_037F_0000_1F80);
    sp.add(1).write(0); // r15
    sp.add(2).write(0); // r14
    sp.add(3).write(0); // r13
    sp.add(4).write(entry as usize as u64); // r12, read by the boot thunk
    sp.add(5).write(0); // rbx
    sp.add(6).write(0); // rbp
    sp.add(7).write(ember_fiber_boot as usize as u64);

    ContextHandle(sp as *mut ())
}

#[inline]
pub(super) unsafe fn switch(to: *mut (), user_data: usize) -> TransferParams {
    ember_context_switch(to, user_data)
}
