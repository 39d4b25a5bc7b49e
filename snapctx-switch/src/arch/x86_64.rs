//! x86_64 switch routine (System V ABI)
//!
//! Saved frame, from the stored stack pointer upwards:
//!
//! ```text
//!   sp + 0   mxcsr (low 32 bits) | x87 control word (bits 32..48)
//!   sp + 8   r15
//!   sp + 16  r14
//!   sp + 24  r13
//!   sp + 32  r12
//!   sp + 40  rbx
//!   sp + 48  rbp
//!   sp + 56  return address
//! ```

use core::arch::global_asm;

use crate::context::Context;

global_asm!(
    ".text",
    ".global snapctx_context_switch",
    ".p2align 4",
    "snapctx_context_switch:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "sub rsp, 8",
    "stmxcsr dword ptr [rsp]",
    "fnstcw word ptr [rsp + 4]",
    "mov qword ptr [rdi], rsp",
    "mov rsp, qword ptr [rsi]",
    "ldmxcsr dword ptr [rsp]",
    "fldcw word ptr [rsp + 4]",
    "add rsp, 8",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "mov rax, rdx",
    "ret",
    "",
    ".global snapctx_context_trampoline",
    ".p2align 4",
    "snapctx_context_trampoline:",
    // r12 = data, r13 = entry, rax = arg handed over by the first switch
    "mov rdi, r12",
    "mov rsi, rax",
    "call r13",
    "ud2",
);

extern "C" {
    fn snapctx_context_switch(from: *mut Context, to: *const Context, arg: usize) -> usize;
    fn snapctx_context_trampoline();
}

/// Default MXCSR (all exceptions masked) and x87 control word.
const INITIAL_CONTROL_WORDS: usize = 0x1F80 | (0x037F << 32);

/// Bytes reserved below the stack top for a fresh frame. Leaves the
/// trampoline with a 16-byte aligned stack at its `call`.
pub const INITIAL_FRAME_BYTES: usize = 80;

/// Save the callee-saved state into `from`, load `to` and hand `arg` over.
#[inline(always)]
pub unsafe fn switch(from: *mut Context, to: *const Context, arg: usize) -> usize {
    snapctx_context_switch(from, to, arg)
}

/// Lay out a frame under `top` that the switch routine will pop into the
/// trampoline. Returns the stack pointer to store in the context.
pub unsafe fn init_frame(top: usize, entry: usize, data: usize) -> usize {
    let sp = top - INITIAL_FRAME_BYTES;
    let frame = sp as *mut usize;

    frame.add(0).write(INITIAL_CONTROL_WORDS);
    frame.add(1).write(0); // r15
    frame.add(2).write(0); // r14
    frame.add(3).write(entry); // r13
    frame.add(4).write(data); // r12
    frame.add(5).write(0); // rbx
    frame.add(6).write(0); // rbp
    frame.add(7).write(snapctx_context_trampoline as usize);
    frame.add(8).write(0);
    frame.add(9).write(0);

    sp
}
