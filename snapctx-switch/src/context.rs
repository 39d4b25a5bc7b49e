//! Saved execution contexts
//!
//! A `Context` is just the stack pointer of a suspended control point; the
//! callee-saved registers and resume address sit on that stack. Whoever
//! owns the stack memory owns the context.

use crate::arch;

/// Entry routine of a prepared context. Receives the `data` word given to
/// [`Context::prepare`] and the `arg` of the first switch into it.
pub type EntryFn = extern "C" fn(data: usize, arg: usize) -> !;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Context {
    sp: usize,
}

impl Context {
    pub const fn empty() -> Self {
        Self { sp: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.sp == 0
    }

    /// Stack pointer the context resumes with
    pub fn stack_pointer(&self) -> usize {
        self.sp
    }

    /// Prepare a context that runs `entry(data, arg)` on the given stack the
    /// first time it is switched to.
    ///
    /// # Safety
    /// `stack` must be valid for writes of `len` bytes and stay alive (and
    /// unused by anything else) for as long as the context may run.
    pub unsafe fn prepare(stack: *mut u8, len: usize, entry: EntryFn, data: usize) -> Self {
        let top = (stack as usize + len) & !(arch::STACK_ALIGN - 1);
        debug_assert!(top - arch::INITIAL_FRAME_BYTES >= stack as usize);

        Self {
            sp: arch::init_frame(top, entry as usize, data),
        }
    }

    /// Suspend the current control point into `from` and continue `to`.
    ///
    /// Returns the `arg` of whichever switch later resumes `from`.
    ///
    /// # Safety
    /// `to` must hold a context that was prepared or saved and whose stack
    /// is still mapped. `from` must stay valid until it is resumed.
    #[inline(never)]
    pub unsafe fn swap(from: *mut Context, to: *const Context, arg: usize) -> usize {
        arch::switch(from, to, arg)
    }

    /// One-way jump to `to`; the current control point is abandoned.
    ///
    /// # Safety
    /// Same requirements on `to` as [`Context::swap`]. Nothing on the
    /// abandoned stack is dropped.
    pub unsafe fn resume(to: *const Context, arg: usize) -> ! {
        let mut abandoned = Context::empty();
        arch::switch(&mut abandoned, to, arg);
        core::hint::unreachable_unchecked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PingPong {
        host: Context,
        task: Context,
        hits: usize,
        stack: (usize, usize),
        seen_sp: usize,
    }

    extern "C" fn bounce(data: usize, arg: usize) -> ! {
        let pp = data as *mut PingPong;
        let mut value = arg;
        loop {
            let marker = 0u8;
            unsafe {
                (*pp).hits += 1;
                (*pp).seen_sp = &marker as *const u8 as usize;
                value = Context::swap(&mut (*pp).task, &(*pp).host, value + 1);
            }
        }
    }

    extern "C" fn finish(data: usize, arg: usize) -> ! {
        let pp = data as *mut PingPong;
        // floating point state must survive the hop
        let scaled = (arg as f64) * 1.5;
        unsafe {
            (*pp).hits = scaled as usize;
            Context::resume(&(*pp).host, arg * 2)
        }
    }

    fn with_stack<F: FnOnce(*mut u8, usize)>(f: F) {
        let mut stack = std::vec![0u8; 64 * 1024];
        f(stack.as_mut_ptr(), stack.len());
    }

    #[test]
    fn test_swap_round_trips_arguments() {
        with_stack(|base, len| unsafe {
            let mut pp = PingPong {
                host: Context::empty(),
                task: Context::empty(),
                hits: 0,
                stack: (base as usize, base as usize + len),
                seen_sp: 0,
            };
            let p = &mut pp as *mut PingPong;
            (*p).task = Context::prepare(base, len, bounce, p as usize);
            assert!(!(*p).task.is_empty());

            assert_eq!(Context::swap(&mut (*p).host, &(*p).task, 1), 2);
            assert_eq!(Context::swap(&mut (*p).host, &(*p).task, 10), 11);
            assert_eq!(Context::swap(&mut (*p).host, &(*p).task, 41), 42);
            assert_eq!((*p).hits, 3);
        });
    }

    #[test]
    fn test_task_runs_on_its_own_stack() {
        with_stack(|base, len| unsafe {
            let mut pp = PingPong {
                host: Context::empty(),
                task: Context::empty(),
                hits: 0,
                stack: (base as usize, base as usize + len),
                seen_sp: 0,
            };
            let p = &mut pp as *mut PingPong;
            (*p).task = Context::prepare(base, len, bounce, p as usize);
            Context::swap(&mut (*p).host, &(*p).task, 0);

            let (lo, hi) = (*p).stack;
            assert!((*p).seen_sp >= lo && (*p).seen_sp < hi);
            let saved = (*p).task.stack_pointer();
            assert!(saved >= lo && saved < hi);
            assert_eq!(saved % arch::STACK_ALIGN, 0);
        });
    }

    #[test]
    fn test_resume_abandons_task() {
        with_stack(|base, len| unsafe {
            let mut pp = PingPong {
                host: Context::empty(),
                task: Context::empty(),
                hits: 0,
                stack: (base as usize, base as usize + len),
                seen_sp: 0,
            };
            let p = &mut pp as *mut PingPong;
            (*p).task = Context::prepare(base, len, finish, p as usize);

            assert_eq!(Context::swap(&mut (*p).host, &(*p).task, 4), 8);
            assert_eq!((*p).hits, 6);
        });
    }
}
