//! Tasks that run on the managed stack
//!
//! The task to run is chosen at fresh start and recorded in the region
//! header, so a restored process does not need to be told what it is
//! resuming.

pub mod counter;
pub mod repl;

use std::time::Duration;

use crate::error::{Result, SnapError};
use crate::managed::Managed;
use crate::protocol::Wake;

const KIND_COUNTER: u32 = 1;
const KIND_SCRATCHPAD: u32 = 2;

const FLAG_KEEP_RUNNING: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSpec {
    /// Checkpoint when the counter reaches this value
    pub target: u64,
    /// Finish when the counter reaches this value
    pub until: Option<u64>,
    pub interval: Duration,
    /// Keep counting after the checkpoint instead of exiting
    pub keep_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Counter(CounterSpec),
    /// Interactive session around the built-in guest runtime
    Scratchpad,
}

/// On-region form of [`Task`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TaskRecord {
    kind: u32,
    flags: u32,
    target: u64,
    until: u64,
    interval_ms: u64,
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        match task {
            Task::Counter(spec) => TaskRecord {
                kind: KIND_COUNTER,
                flags: if spec.keep_running { FLAG_KEEP_RUNNING } else { 0 },
                target: spec.target,
                until: spec.until.unwrap_or(0),
                interval_ms: spec.interval.as_millis() as u64,
            },
            Task::Scratchpad => TaskRecord {
                kind: KIND_SCRATCHPAD,
                ..TaskRecord::default()
            },
        }
    }
}

impl TryFrom<TaskRecord> for Task {
    type Error = SnapError;

    fn try_from(rec: TaskRecord) -> Result<Self> {
        match rec.kind {
            KIND_COUNTER => Ok(Task::Counter(CounterSpec {
                target: rec.target,
                until: (rec.until != 0).then_some(rec.until),
                interval: Duration::from_millis(rec.interval_ms),
                keep_running: rec.flags & FLAG_KEEP_RUNNING != 0,
            })),
            KIND_SCRATCHPAD => Ok(Task::Scratchpad),
            other => Err(SnapError::BadHeader {
                reason: format!("unknown task kind {}", other),
            }),
        }
    }
}

/// Body of the managed computation
pub fn run(cx: &mut Managed, wake: Wake) -> Result<()> {
    if wake != Wake::Started {
        return Err(SnapError::Protocol(format!(
            "task entered with {:?} instead of a fresh start",
            wake
        )));
    }

    match cx.task()? {
        Task::Counter(spec) => counter::run(cx, spec),
        Task::Scratchpad => repl::run(cx),
    }
}
