//! Architecture-specific switch routines
//!
//! Each backend exports the same two symbols from `global_asm!`:
//! `snapctx_context_switch(from, to, arg) -> arg` and the
//! `snapctx_context_trampoline` that a prepared stack "returns" into.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::*;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::*;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("snapctx-switch supports x86_64 and aarch64 only");

/// Stack alignment required at a call boundary on every supported target.
pub const STACK_ALIGN: usize = 16;
