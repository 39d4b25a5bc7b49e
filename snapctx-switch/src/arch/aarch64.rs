//! aarch64 switch routine (AAPCS64)
//!
//! Saved frame is 176 bytes: x19..x30 pairs, d8..d15 pairs, then FPCR.

use core::arch::global_asm;

use crate::context::Context;

global_asm!(
    ".text",
    ".global snapctx_context_switch",
    ".p2align 4",
    "snapctx_context_switch:",
    "sub sp, sp, #176",
    "stp x19, x20, [sp, #0]",
    "stp x21, x22, [sp, #16]",
    "stp x23, x24, [sp, #32]",
    "stp x25, x26, [sp, #48]",
    "stp x27, x28, [sp, #64]",
    "stp x29, x30, [sp, #80]",
    "stp d8, d9, [sp, #96]",
    "stp d10, d11, [sp, #112]",
    "stp d12, d13, [sp, #128]",
    "stp d14, d15, [sp, #144]",
    "mrs x9, fpcr",
    "str x9, [sp, #160]",
    "mov x9, sp",
    "str x9, [x0]",
    "ldr x9, [x1]",
    "mov sp, x9",
    "ldr x9, [sp, #160]",
    "msr fpcr, x9",
    "ldp x19, x20, [sp, #0]",
    "ldp x21, x22, [sp, #16]",
    "ldp x23, x24, [sp, #32]",
    "ldp x25, x26, [sp, #48]",
    "ldp x27, x28, [sp, #64]",
    "ldp x29, x30, [sp, #80]",
    "ldp d8, d9, [sp, #96]",
    "ldp d10, d11, [sp, #112]",
    "ldp d12, d13, [sp, #128]",
    "ldp d14, d15, [sp, #144]",
    "add sp, sp, #176",
    "mov x0, x2",
    "ret",
    "",
    ".global snapctx_context_trampoline",
    ".p2align 4",
    "snapctx_context_trampoline:",
    // x19 = entry, x20 = data, x0 = arg handed over by the first switch
    "mov x1, x0",
    "mov x0, x20",
    "blr x19",
    "brk #0x1",
);

extern "C" {
    fn snapctx_context_switch(from: *mut Context, to: *const Context, arg: usize) -> usize;
    fn snapctx_context_trampoline();
}

pub const INITIAL_FRAME_BYTES: usize = 176;

#[inline(always)]
pub unsafe fn switch(from: *mut Context, to: *const Context, arg: usize) -> usize {
    snapctx_context_switch(from, to, arg)
}

pub unsafe fn init_frame(top: usize, entry: usize, data: usize) -> usize {
    let sp = top - INITIAL_FRAME_BYTES;
    let frame = sp as *mut usize;

    for i in 0..INITIAL_FRAME_BYTES / core::mem::size_of::<usize>() {
        frame.add(i).write(0);
    }
    frame.add(0).write(entry); // x19
    frame.add(1).write(data); // x20
    frame.add(11).write(snapctx_context_trampoline as usize); // x30

    sp
}
