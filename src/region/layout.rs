//! Region geometry
//!
//! ```text
//!   base - page   guard page (PROT_NONE, not part of the image)
//!   base          execution stack        stack_size bytes, grows down
//!   + stack_size  header                 page-rounded
//!   + ...         heap buffer            heap_size bytes
//! ```
//!
//! The stack sits at the bottom so an overflow runs into the guard page
//! rather than into the header.

use super::header::Header;
use super::page_size;
use crate::error::{Result, SnapError};

pub const DEFAULT_BASE: usize = 0x4000_0000;
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
pub const DEFAULT_HEAP_SIZE: usize = 8 * 1024 * 1024;

pub const MIN_STACK_SIZE: usize = 64 * 1024;
pub const MIN_HEAP_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    base: usize,
    stack_size: usize,
    heap_size: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            stack_size: DEFAULT_STACK_SIZE,
            heap_size: DEFAULT_HEAP_SIZE,
        }
    }
}

fn invalid(reason: String) -> SnapError {
    SnapError::InvalidLayout { reason }
}

impl Layout {
    pub fn new(base: usize, stack_size: usize, heap_size: usize) -> Result<Self> {
        let page = page_size();

        if base == 0 || base % page != 0 {
            return Err(invalid(format!("base {:#x} is not a non-zero page multiple", base)));
        }
        if base < page {
            return Err(invalid(format!("base {:#x} leaves no room for a guard page", base)));
        }
        if stack_size < MIN_STACK_SIZE || stack_size % page != 0 {
            return Err(invalid(format!(
                "stack size {} must be a page multiple of at least {}",
                stack_size, MIN_STACK_SIZE
            )));
        }
        if heap_size < MIN_HEAP_SIZE || heap_size % page != 0 {
            return Err(invalid(format!(
                "heap size {} must be a page multiple of at least {}",
                heap_size, MIN_HEAP_SIZE
            )));
        }

        let layout = Self {
            base,
            stack_size,
            heap_size,
        };
        let end = stack_size
            .checked_add(layout.header_len())
            .and_then(|n| n.checked_add(heap_size))
            .and_then(|len| base.checked_add(len));
        if end.is_none() {
            return Err(invalid(format!("region at {:#x} overflows the address space", base)));
        }
        Ok(layout)
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub fn header_offset(&self) -> usize {
        self.stack_size
    }

    pub fn header_len(&self) -> usize {
        let page = page_size();
        (std::mem::size_of::<Header>() + page - 1) & !(page - 1)
    }

    pub fn heap_offset(&self) -> usize {
        self.header_offset() + self.header_len()
    }

    /// Total bytes mapped and persisted
    pub fn len(&self) -> usize {
        self.heap_offset() + self.heap_size
    }

    pub fn end(&self) -> usize {
        self.base + self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_valid() {
        let d = Layout::default();
        let layout = Layout::new(d.base(), d.stack_size(), d.heap_size()).unwrap();
        assert_eq!(layout, d);
    }

    #[test]
    fn test_sections_are_contiguous_and_ordered() {
        let layout = Layout::default();
        assert_eq!(layout.header_offset(), layout.stack_size());
        assert!(layout.header_len() >= std::mem::size_of::<Header>());
        assert_eq!(layout.header_len() % page_size(), 0);
        assert_eq!(layout.heap_offset() % page_size(), 0);
        assert_eq!(layout.len(), layout.heap_offset() + layout.heap_size());
        assert_eq!(layout.end() - layout.base(), layout.len());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let page = page_size();
        assert!(Layout::new(0, DEFAULT_STACK_SIZE, DEFAULT_HEAP_SIZE).is_err());
        assert!(Layout::new(DEFAULT_BASE + 1, DEFAULT_STACK_SIZE, DEFAULT_HEAP_SIZE).is_err());
        assert!(Layout::new(DEFAULT_BASE, MIN_STACK_SIZE - page, DEFAULT_HEAP_SIZE).is_err());
        assert!(Layout::new(DEFAULT_BASE, DEFAULT_STACK_SIZE, DEFAULT_HEAP_SIZE + 1).is_err());
        assert!(Layout::new(usize::MAX & !(page - 1), DEFAULT_STACK_SIZE, DEFAULT_HEAP_SIZE).is_err());
    }

    #[test]
    fn test_rejects_sizes_that_overflow() {
        let huge = usize::MAX & !(page_size() - 1);
        for (stack, heap) in [
            (DEFAULT_STACK_SIZE, huge),
            (huge, DEFAULT_HEAP_SIZE),
            (huge, huge),
        ] {
            assert!(matches!(
                Layout::new(DEFAULT_BASE, stack, heap),
                Err(SnapError::InvalidLayout { .. })
            ));
        }
    }
}
