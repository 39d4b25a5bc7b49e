//! Region header: everything the engine keeps about the task that is not
//! on its stack or in its heap. Plain `repr(C)` data, persisted verbatim.

use snapctx_switch::{Context, EntryFn};

use super::layout::Layout;
use crate::arena::Arena;
use crate::error::{Result, SnapError};
use crate::protocol::{Handoff, SaveLatch};
use crate::tasks::TaskRecord;

#[derive(Debug)]
#[repr(C)]
pub struct Header {
    /// Address the region was mapped at when the image was taken
    pub base: usize,
    pub stack_len: usize,
    pub heap_len: usize,
    /// Address of the task entry routine in the binary that wrote the image
    pub entry: usize,
    pub latch: SaveLatch,
    /// Raw [`Handoff`] word
    pub handoff: u32,
    /// The task's control point
    pub captured: Context,
    /// The host's control point, refreshed on every switch into the task
    pub home: Context,
    pub task: TaskRecord,
    pub arena: Arena,
}

impl Header {
    pub fn fresh(layout: &Layout, entry: EntryFn, task: TaskRecord) -> Self {
        Self {
            base: layout.base(),
            stack_len: layout.stack_size(),
            heap_len: layout.heap_size(),
            entry: entry as usize,
            latch: SaveLatch::new(),
            handoff: Handoff::None as u32,
            captured: Context::empty(),
            home: Context::empty(),
            task,
            arena: Arena::empty(),
        }
    }

    /// Check that a loaded image belongs to this mapping and this binary.
    pub fn validate(&self, layout: &Layout, entry: EntryFn) -> Result<()> {
        if self.base != layout.base() {
            return Err(SnapError::LayoutMismatch {
                reason: format!(
                    "image was taken at {:#x} but the region is mapped at {:#x}",
                    self.base,
                    layout.base()
                ),
            });
        }
        if self.stack_len != layout.stack_size() || self.heap_len != layout.heap_size() {
            return Err(SnapError::LayoutMismatch {
                reason: format!(
                    "image has stack {} / heap {}, region has stack {} / heap {}",
                    self.stack_len,
                    self.heap_len,
                    layout.stack_size(),
                    layout.heap_size()
                ),
            });
        }
        if self.entry != entry as usize {
            return Err(SnapError::BuildMismatch {
                saved: self.entry,
                current: entry as usize,
            });
        }

        self.latch.phase()?;
        Handoff::try_from(self.handoff)?;

        let sp = self.captured.stack_pointer();
        if sp < layout.base() || sp >= layout.base() + layout.stack_size() {
            return Err(SnapError::BadHeader {
                reason: format!("captured stack pointer {:#x} is off the task stack", sp),
            });
        }
        Ok(())
    }
}
