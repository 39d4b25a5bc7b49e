//! Embedded guest runtimes
//!
//! A guest sees exactly one capability from the engine: an allocator
//! plug-in of the classic `(userdata, ptr, old_size, new_size)` shape. It
//! is expected to keep all of its state in blocks obtained through it, so
//! the state is captured with the arena. Evaluation itself is opaque and
//! blocking.

pub mod scratchpad;

use std::io;

use libc::c_void;
use thiserror::Error;

use crate::arena::{arena_alloc_fn, Arena};

pub use scratchpad::Scratchpad;

/// Allocator plug-in: `new_size == 0` frees, null `ptr` allocates,
/// otherwise reallocates. Returns null on failure or after a free.
pub type AllocFn =
    unsafe extern "C" fn(ud: *mut c_void, ptr: *mut c_void, osize: usize, nsize: usize) -> *mut c_void;

#[derive(Error, Debug)]
pub enum GuestError {
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("no entry named '{0}'")]
    Missing(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub trait GuestRuntime {
    /// Evaluate one line of input, writing any reply to `out`.
    fn eval(&mut self, line: &str, out: &mut dyn io::Write) -> Result<(), GuestError>;
}

/// The allocator capability handed to a guest
#[derive(Debug, Clone, Copy)]
pub struct GuestAllocator {
    f: AllocFn,
    ud: *mut c_void,
}

impl GuestAllocator {
    pub fn new(f: AllocFn, ud: *mut c_void) -> Self {
        Self { f, ud }
    }

    /// Plug-in bound to an arena in the region
    pub fn for_arena(arena: *mut Arena) -> Self {
        Self::new(arena_alloc_fn, arena as *mut c_void)
    }

    pub fn alloc(&self, size: usize) -> Result<*mut u8, GuestError> {
        let p = unsafe { (self.f)(self.ud, std::ptr::null_mut(), 0, size) };
        if p.is_null() {
            return Err(GuestError::OutOfMemory { requested: size });
        }
        Ok(p as *mut u8)
    }

    pub fn realloc(&self, ptr: *mut u8, old: usize, size: usize) -> Result<*mut u8, GuestError> {
        let p = unsafe { (self.f)(self.ud, ptr as *mut c_void, old, size) };
        if p.is_null() {
            return Err(GuestError::OutOfMemory { requested: size });
        }
        Ok(p as *mut u8)
    }

    pub fn free(&self, ptr: *mut u8, old: usize) {
        unsafe { (self.f)(self.ud, ptr as *mut c_void, old, 0) };
    }
}
