//! Counting task
//!
//! Counts up once per interval and checkpoints when it reaches its target.
//! Every value is also appended to a history array in the arena, so a
//! restored run can show that its heap came back along with its stack.

use std::thread;

use crate::error::Result;
use crate::managed::{Managed, Resumption};
use crate::tasks::CounterSpec;

/// Growable `u64` array in the arena. Holds only region addresses.
struct History {
    data: *mut u64,
    len: usize,
}

impl History {
    fn new() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }

    fn push(&mut self, cx: &mut Managed, value: u64) -> Result<()> {
        let bytes = (self.len + 1) * std::mem::size_of::<u64>();
        let data = cx.arena().reallocate(self.data as *mut u8, bytes)?;
        self.data = data.as_ptr() as *mut u64;
        unsafe { self.data.add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    fn as_slice(&self) -> &[u64] {
        if self.data.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

pub fn run(cx: &mut Managed, spec: CounterSpec) -> Result<()> {
    let mut history = History::new();
    let mut counter: u64 = 0;

    loop {
        let mut just_restored = false;
        println!("Counter: {}", counter);
        history.push(cx, counter)?;
        counter += 1;

        if counter == spec.target {
            let resumed = if spec.keep_running {
                cx.checkpoint()?
            } else {
                cx.checkpoint_and_exit()?
            };
            match resumed {
                Resumption::Restored => {
                    println!("State restored successfully!");
                    println!("History: {:?}", history.as_slice());
                    just_restored = true;
                }
                Resumption::Saved => log::debug!("Checkpoint written, continuing"),
            }
        }

        if spec.until.is_some_and(|limit| counter >= limit) {
            log::debug!("Counter reached {}, finishing", counter);
            return Ok(());
        }
        if !just_restored && !spec.interval.is_zero() {
            thread::sleep(spec.interval);
        }
    }
}
