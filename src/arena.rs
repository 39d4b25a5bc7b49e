//! Heap arena living inside the snapshotted region.
//!
//! Blocks are carved out of one fixed buffer. Every block starts with a
//! 16-byte header; free blocks are kept on a singly linked list sorted by
//! address so neighbours can be merged on release. All links are absolute
//! addresses: the region is mapped at the same place on every run, so the
//! list is still valid after a restore.
//!
//! ```text
//!   start                                                       end
//!   | hdr | payload ... | hdr | payload ... | hdr | free ...      |
//! ```
//!
//! The bookkeeping struct itself is plain data and sits in the region
//! header, next to the buffer it manages.

use std::ptr::{self, NonNull};

use libc::c_void;
use thiserror::Error;

/// Payload alignment and size granule
pub const ALIGN: usize = 16;

const HEADER: usize = std::mem::size_of::<BlockHeader>();

/// `next` value of a block that is handed out
const IN_USE: usize = usize::MAX;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena exhausted: requested {requested} bytes, {available} bytes free")]
    Exhausted { requested: usize, available: usize },

    #[error("pointer {addr:#x} does not belong to this arena")]
    Foreign { addr: usize },

    #[error("block at {addr:#x} is not allocated")]
    NotAllocated { addr: usize },

    #[error("arena buffer of {len} bytes is too small")]
    TooSmall { len: usize },
}

#[repr(C)]
struct BlockHeader {
    /// Payload bytes, a multiple of `ALIGN`
    size: usize,
    /// Next free block, or `IN_USE`
    next: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub capacity: usize,
    pub used: usize,
    pub free: usize,
    pub live_blocks: usize,
    pub free_blocks: usize,
    pub largest_free: usize,
}

#[derive(Debug, Default)]
#[repr(C)]
pub struct Arena {
    start: usize,
    end: usize,
    free_head: usize,
    used: usize,
    live: usize,
}

#[inline]
fn hdr(addr: usize) -> *mut BlockHeader {
    addr as *mut BlockHeader
}

/// `None` when the rounded size does not fit in a `usize`
#[inline]
fn round_up(n: usize) -> Option<usize> {
    Some(n.max(1).checked_add(ALIGN - 1)? & !(ALIGN - 1))
}

impl Arena {
    pub const fn empty() -> Self {
        Self {
            start: 0,
            end: 0,
            free_head: 0,
            used: 0,
            live: 0,
        }
    }

    /// Bind the arena to `len` bytes at `buf`, discarding any previous state.
    ///
    /// # Safety
    /// The buffer must be valid for reads and writes for as long as the
    /// arena is used, and must not be touched by anything else.
    pub unsafe fn init(&mut self, buf: *mut u8, len: usize) -> Result<(), ArenaError> {
        let start = (buf as usize + ALIGN - 1) & !(ALIGN - 1);
        let end = (buf as usize + len) & !(ALIGN - 1);
        if end < start || end - start < HEADER + ALIGN {
            return Err(ArenaError::TooSmall { len });
        }

        let first = hdr(start);
        (*first).size = end - start - HEADER;
        (*first).next = 0;

        *self = Self {
            start,
            end,
            free_head: start,
            used: 0,
            live: 0,
        };
        Ok(())
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        let p = ptr as usize;
        p >= self.start && p < self.end
    }

    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        let need = self.granted(size)?;
        let mut prev = 0usize;
        let mut cur = self.free_head;

        unsafe {
            while cur != 0 {
                let block = hdr(cur);
                if (*block).size >= need {
                    let next = self.split(cur, need);
                    self.relink(prev, next);
                    (*block).next = IN_USE;
                    self.used += (*block).size;
                    self.live += 1;
                    return Ok(NonNull::new_unchecked((cur + HEADER) as *mut u8));
                }
                prev = cur;
                cur = (*block).next;
            }
        }

        Err(ArenaError::Exhausted {
            requested: size,
            available: self.stats().free,
        })
    }

    /// Release a block. A null pointer is ignored.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), ArenaError> {
        if ptr.is_null() {
            return Ok(());
        }
        let block = self.block_of(ptr)?;
        unsafe {
            self.used -= (*hdr(block)).size;
            self.live -= 1;
            self.insert_free(block);
        }
        Ok(())
    }

    /// Resize a block, moving it if it cannot grow in place. On failure the
    /// original block is left untouched.
    pub fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Result<NonNull<u8>, ArenaError> {
        if ptr.is_null() {
            return self.allocate(size);
        }
        let block = self.block_of(ptr)?;
        let need = self.granted(size)?;

        unsafe {
            let old = (*hdr(block)).size;
            if need <= old {
                self.shrink(block, need);
                return Ok(NonNull::new_unchecked(ptr));
            }
            if self.grow_in_place(block, need) {
                return Ok(NonNull::new_unchecked(ptr));
            }

            let moved = self.allocate(size)?;
            ptr::copy_nonoverlapping(ptr, moved.as_ptr(), old);
            self.free(ptr)?;
            Ok(moved)
        }
    }

    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            capacity: self.capacity(),
            used: self.used,
            live_blocks: self.live,
            ..ArenaStats::default()
        };
        let mut cur = self.free_head;
        while cur != 0 {
            unsafe {
                let size = (*hdr(cur)).size;
                stats.free += size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(size);
                cur = (*hdr(cur)).next;
            }
        }
        stats
    }

    /// Rounded payload size for a request, or `Exhausted` if no block in
    /// this arena could ever hold it.
    fn granted(&self, size: usize) -> Result<usize, ArenaError> {
        match round_up(size) {
            Some(need) if need <= self.capacity() => Ok(need),
            _ => Err(ArenaError::Exhausted {
                requested: size,
                available: self.stats().free,
            }),
        }
    }

    fn block_of(&self, ptr: *mut u8) -> Result<usize, ArenaError> {
        let addr = ptr as usize;
        if addr < self.start + HEADER || addr >= self.end || addr % ALIGN != 0 {
            return Err(ArenaError::Foreign { addr });
        }
        let block = addr - HEADER;
        if unsafe { (*hdr(block)).next } != IN_USE {
            return Err(ArenaError::NotAllocated { addr });
        }
        Ok(block)
    }

    /// Trim `block` to `need` bytes if the remainder can hold another block.
    /// Returns the address that should take `block`'s place in the free list.
    unsafe fn split(&mut self, block: usize, need: usize) -> usize {
        let size = (*hdr(block)).size;
        let next = (*hdr(block)).next;
        if size - need < HEADER + ALIGN {
            return next;
        }
        let rest = block + HEADER + need;
        (*hdr(rest)).size = size - need - HEADER;
        (*hdr(rest)).next = next;
        (*hdr(block)).size = need;
        rest
    }

    unsafe fn relink(&mut self, prev: usize, next: usize) {
        if prev == 0 {
            self.free_head = next;
        } else {
            (*hdr(prev)).next = next;
        }
    }

    unsafe fn shrink(&mut self, block: usize, need: usize) {
        let size = (*hdr(block)).size;
        if size - need < HEADER + ALIGN {
            return;
        }
        let rest = block + HEADER + need;
        (*hdr(rest)).size = size - need - HEADER;
        (*hdr(block)).size = need;
        self.used -= size - need;
        self.insert_free(rest);
    }

    unsafe fn grow_in_place(&mut self, block: usize, need: usize) -> bool {
        let size = (*hdr(block)).size;
        let neighbour = block + HEADER + size;

        let mut prev = 0usize;
        let mut cur = self.free_head;
        while cur != 0 && cur < neighbour {
            prev = cur;
            cur = (*hdr(cur)).next;
        }
        if cur != neighbour || size + HEADER + (*hdr(cur)).size < need {
            return false;
        }

        self.relink(prev, (*hdr(cur)).next);
        (*hdr(block)).size = size + HEADER + (*hdr(cur)).size;
        self.used += (*hdr(block)).size - size;
        self.shrink(block, need);
        true
    }

    /// Put `block` back on the address-ordered free list, merging it with
    /// adjacent free neighbours.
    unsafe fn insert_free(&mut self, block: usize) {
        let mut prev = 0usize;
        let mut cur = self.free_head;
        while cur != 0 && cur < block {
            prev = cur;
            cur = (*hdr(cur)).next;
        }

        (*hdr(block)).next = cur;
        self.relink(prev, block);

        if cur != 0 && block + HEADER + (*hdr(block)).size == cur {
            (*hdr(block)).size += HEADER + (*hdr(cur)).size;
            (*hdr(block)).next = (*hdr(cur)).next;
        }
        if prev != 0 && prev + HEADER + (*hdr(prev)).size == block {
            (*hdr(prev)).size += HEADER + (*hdr(block)).size;
            (*hdr(prev)).next = (*hdr(block)).next;
        }
    }
}

/// Allocator plug-in entry point for embedded runtimes.
///
/// `ud` must point at an initialised [`Arena`]. `nsize == 0` frees `ptr`
/// and returns null, a null `ptr` allocates, anything else reallocates.
/// Failures come back as null.
pub unsafe extern "C" fn arena_alloc_fn(
    ud: *mut c_void,
    ptr: *mut c_void,
    _osize: usize,
    nsize: usize,
) -> *mut c_void {
    let arena = &mut *(ud as *mut Arena);

    if nsize == 0 {
        if let Err(e) = arena.free(ptr as *mut u8) {
            log::error!("guest free failed: {}", e);
        }
        return ptr::null_mut();
    }

    let result = if ptr.is_null() {
        arena.allocate(nsize)
    } else {
        arena.reallocate(ptr as *mut u8, nsize)
    };

    match result {
        Ok(p) => p.as_ptr() as *mut c_void,
        Err(e) => {
            log::debug!("guest allocation of {} bytes failed: {}", nsize, e);
            ptr::null_mut()
        }
    }
}
