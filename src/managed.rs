//! Task-side view of the region
//!
//! Code in here runs on the region's own stack. Anything that is live in a
//! task frame when it checkpoints ends up in the image, so tasks keep
//! their state in locals, in the header or in the arena, never in host
//! heap allocations that outlive a statement.
//!
//! The header is only ever touched through the raw pointer. The host
//! writes to it while the task is suspended, so no reference into it may
//! be held across a switch.

use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use snapctx_switch::Context;

use crate::arena::Arena;
use crate::error::{Result, SnapError};
use crate::protocol::{Handoff, Wake};
use crate::region::Header;
use crate::tasks::{self, Task};

/// How a checkpoint call came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    /// The image was written and this process carried on
    Saved,
    /// This process was restored from the image
    Restored,
}

pub struct Managed {
    header: NonNull<Header>,
}

impl Managed {
    /// # Safety
    /// `header` must point at the initialised header of a mapped region,
    /// and the caller must be running on that region's stack.
    pub unsafe fn from_raw(header: *mut Header) -> Self {
        Self {
            header: NonNull::new_unchecked(header),
        }
    }

    pub fn task(&self) -> Result<Task> {
        let record = unsafe { ptr::addr_of!((*self.header.as_ptr()).task).read() };
        Task::try_from(record)
    }

    pub fn arena(&mut self) -> &mut Arena {
        unsafe { &mut *self.arena_ptr() }
    }

    /// Raw arena address, for runtimes that take an allocator plug-in
    pub fn arena_ptr(&self) -> *mut Arena {
        unsafe { ptr::addr_of_mut!((*self.header.as_ptr()).arena) }
    }

    /// Persist the region and keep running.
    pub fn checkpoint(&mut self) -> Result<Resumption> {
        self.save(Handoff::Save)
    }

    /// Persist the region and let the host exit. Only comes back in a
    /// process restored from the image.
    pub fn checkpoint_and_exit(&mut self) -> Result<Resumption> {
        self.save(Handoff::SaveAndExit)
    }

    fn save(&mut self, request: Handoff) -> Result<Resumption> {
        let h = self.header.as_ptr();
        unsafe {
            (*h).latch.arm()?;
        }

        // Our resume point is the return from this switch, whether the
        // host switches back after writing or a new process loads the image.
        let wake = self.yield_to_host(request);

        let h = self.header.as_ptr();
        if unsafe { (*h).latch.is_pending() } {
            return Err(SnapError::Protocol(
                "resumed with the save latch still armed".into(),
            ));
        }

        match Wake::try_from(wake)? {
            Wake::Saved if request == Handoff::Save => Ok(Resumption::Saved),
            Wake::Restored => Ok(Resumption::Restored),
            other => Err(SnapError::Protocol(format!(
                "{:?} checkpoint woke with {:?}",
                request, other
            ))),
        }
    }

    /// Ask the host to replace the whole region with the stored image.
    /// The current stack is abandoned; execution continues at the
    /// checkpoint the image was taken at.
    pub fn request_restore(&mut self) -> ! {
        let h = self.header.as_ptr();
        unsafe {
            (*h).handoff = Handoff::Restore as u32;
            Context::resume(ptr::addr_of!((*h).home), 0)
        }
    }

    fn yield_to_host(&mut self, request: Handoff) -> usize {
        let h = self.header.as_ptr();
        unsafe {
            (*h).handoff = request as u32;
            Context::swap(
                ptr::addr_of_mut!((*h).captured),
                ptr::addr_of!((*h).home),
                0,
            )
        }
    }

    fn finish(self, outcome: Handoff) -> ! {
        let h = self.header.as_ptr();
        unsafe {
            (*h).handoff = outcome as u32;
            Context::resume(ptr::addr_of!((*h).home), 0)
        }
    }
}

/// First frame on the region stack. `data` is the header address.
pub extern "C" fn task_entry(data: usize, wake: usize) -> ! {
    let mut cx = unsafe { Managed::from_raw(data as *mut Header) };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let wake = Wake::try_from(wake)?;
        tasks::run(&mut cx, wake)
    }));

    let outcome = match result {
        Ok(Ok(())) => Handoff::Finished,
        Ok(Err(err)) => {
            log::error!("Managed task failed: {}", err);
            Handoff::Failed
        }
        Err(_) => {
            log::error!("Managed task panicked");
            Handoff::Failed
        }
    };
    cx.finish(outcome)
}
