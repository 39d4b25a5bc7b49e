//! The state region: one mapping at a fixed address holding the task's
//! stack, the header and the heap buffer.
//!
//! The address is not negotiable. Return addresses on the stack, links
//! in the arena and any pointer the task keeps into its heap are absolute,
//! so an image is only meaningful at the address it was taken at.

pub mod header;
pub mod layout;

use std::io;
use std::ptr;
use std::sync::OnceLock;

use libc::{
    c_void, mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_FIXED_NOREPLACE, MAP_PRIVATE, PROT_NONE,
    PROT_READ, PROT_WRITE,
};
use snapctx_switch::{Context, EntryFn};

use crate::error::{Result, SnapError};
use crate::tasks::TaskRecord;

pub use header::Header;
pub use layout::Layout;

pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

#[derive(Debug)]
pub struct Region {
    layout: Layout,
    guard: Option<usize>,
}

impl Region {
    /// Map the region at exactly `layout.base()`.
    ///
    /// Uses `MAP_FIXED_NOREPLACE`, so an occupied range is an error rather
    /// than something silently clobbered. Kernels without the flag treat it
    /// as a hint; a mapping that lands elsewhere is released and reported.
    pub fn map(layout: Layout) -> Result<Self> {
        let len = layout.len();
        let addr = unsafe {
            mmap(
                layout.base() as *mut c_void,
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };

        if addr == MAP_FAILED {
            return Err(SnapError::MapFixed {
                addr: layout.base(),
                len,
                source: io::Error::last_os_error(),
            });
        }
        if addr as usize != layout.base() {
            unsafe { munmap(addr, len) };
            return Err(SnapError::AddressMoved {
                expected: layout.base(),
                actual: addr as usize,
            });
        }

        let guard = map_guard(layout.base());
        log::debug!(
            "Region mapped at {:#x}-{:#x} ({} bytes), guard page {}",
            layout.base(),
            layout.end(),
            len,
            if guard.is_some() { "placed" } else { "missing" }
        );

        Ok(Self { layout, guard })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.layout.base() as *const u8, self.layout.len()) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.layout.base() as *mut u8, self.layout.len())
        }
    }

    pub fn header_ptr(&self) -> *mut Header {
        (self.layout.base() + self.layout.header_offset()) as *mut Header
    }

    pub fn header(&self) -> &Header {
        unsafe { &*self.header_ptr() }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        unsafe { &mut *self.header_ptr() }
    }

    pub fn stack(&self) -> (*mut u8, usize) {
        (self.layout.base() as *mut u8, self.layout.stack_size())
    }

    pub fn heap(&self) -> (*mut u8, usize) {
        (
            (self.layout.base() + self.layout.heap_offset()) as *mut u8,
            self.layout.heap_size(),
        )
    }

    /// Zero the region, build the header and arena, and prepare the task
    /// context so the first switch into it calls `entry`.
    pub fn init_fresh(&mut self, entry: EntryFn, task: TaskRecord) -> Result<()> {
        self.as_bytes_mut().fill(0);

        let layout = self.layout;
        let (stack, stack_len) = self.stack();
        let (heap, heap_len) = self.heap();
        let header = self.header_ptr();

        unsafe {
            ptr::write(header, Header::fresh(&layout, entry, task));
            (*header).arena.init(heap, heap_len)?;
            (*header).captured = Context::prepare(stack, stack_len, entry, header as usize);
        }

        log::debug!(
            "Fresh region: stack {:#x}+{}, heap {:#x}+{}",
            stack as usize,
            stack_len,
            heap as usize,
            heap_len
        );
        Ok(())
    }

    pub fn validate(&self, entry: EntryFn) -> Result<()> {
        self.header().validate(&self.layout, entry)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            munmap(self.layout.base() as *mut c_void, self.layout.len());
            if let Some(guard) = self.guard {
                munmap(guard as *mut c_void, page_size());
            }
        }
    }
}

/// Best effort: an inaccessible page right below the stack.
fn map_guard(base: usize) -> Option<usize> {
    let page = page_size();
    let want = base - page;
    let addr = unsafe {
        mmap(
            want as *mut c_void,
            page,
            PROT_NONE,
            MAP_PRIVATE | MAP_ANONYMOUS | MAP_FIXED_NOREPLACE,
            -1,
            0,
        )
    };

    if addr == MAP_FAILED {
        log::warn!(
            "No guard page below {:#x}: {}",
            base,
            io::Error::last_os_error()
        );
        return None;
    }
    if addr as usize != want {
        unsafe { munmap(addr, page) };
        log::warn!("No guard page below {:#x}: kernel ignored the address", base);
        return None;
    }
    Some(want)
}
