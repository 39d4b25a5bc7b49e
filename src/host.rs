//! Host driver
//!
//! Owns the region and the snapshot store for the life of the process and
//! runs the home side of the hand-off loop: switch into the task, service
//! whatever it asks for, switch back.

use std::env;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::ptr;

use snapctx_switch::{Context, EntryFn};

use crate::error::{Result, SnapError};
use crate::managed::task_entry;
use crate::options::{Mode, Options};
use crate::protocol::{self, Handoff, Wake};
use crate::region::{Layout, Region};
use crate::store::SnapshotStore;
use crate::tasks::Task;

const ADDR_NO_RANDOMIZE: libc::c_ulong = 0x0040000;
const PINNED_ENV: &str = "SNAPCTX_ASLR_PINNED";

/// How the host loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A snapshot was written and the task asked the process to stop
    SavedAndExited,
    /// The task's entry routine returned
    Finished,
}

pub struct Session {
    region: Region,
    store: SnapshotStore,
    entry: EntryFn,
}

impl Session {
    /// Map the region. Nothing is initialised until a start or restore.
    pub fn open(layout: Layout, snapshot: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            region: Region::map(layout)?,
            store: SnapshotStore::new(snapshot),
            entry: task_entry,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn start_fresh(&mut self, task: Task) -> Result<()> {
        self.region.init_fresh(self.entry, task.into())?;
        log::info!(
            "Fresh start, region mapped at {:#x}",
            self.region.layout().base()
        );
        Ok(())
    }

    pub fn restore(&mut self) -> Result<()> {
        protocol::load(&mut self.region, &self.store, self.entry)
    }

    pub fn checkpoint(&mut self) -> Result<()> {
        protocol::persist(&mut self.region, &self.store)
    }

    /// Serve task requests until it finishes or asks to stop.
    pub fn run(&mut self, mut wake: Wake) -> Result<Outcome> {
        loop {
            match self.switch_to_task(wake)? {
                Handoff::Save => {
                    self.checkpoint()?;
                    wake = Wake::Saved;
                }
                Handoff::SaveAndExit => {
                    self.checkpoint()?;
                    println!(
                        "State saved. Run with -r {} to restore.",
                        self.store.path().display()
                    );
                    return Ok(Outcome::SavedAndExited);
                }
                Handoff::Restore => {
                    self.restore()?;
                    wake = Wake::Restored;
                }
                Handoff::Finished => return Ok(Outcome::Finished),
                Handoff::Failed => return Err(SnapError::TaskFailed),
                Handoff::None => {
                    return Err(SnapError::Protocol(
                        "task yielded without a request".into(),
                    ))
                }
            }
        }
    }

    fn switch_to_task(&mut self, wake: Wake) -> Result<Handoff> {
        let h = self.region.header_ptr();
        unsafe {
            (*h).handoff = Handoff::None as u32;
            Context::swap(
                ptr::addr_of_mut!((*h).home),
                ptr::addr_of!((*h).captured),
                wake as usize,
            );
            Handoff::try_from((*h).handoff)
        }
    }
}

/// Map, start or restore, and run to completion.
pub fn drive(options: &Options) -> Result<Outcome> {
    let mut session = Session::open(options.layout, options.mode.snapshot())?;

    let wake = match &options.mode {
        Mode::Fresh { task, .. } => {
            session.start_fresh(*task)?;
            Wake::Started
        }
        Mode::Restore { .. } => {
            session.restore()?;
            Wake::Restored
        }
    };

    session.run(wake)
}

/// Re-execute with address space randomisation off, so shared libraries
/// land where they did when a snapshot was written. Best effort: if the
/// personality cannot be changed (e.g. under a seccomp filter) we carry on
/// and rely on the binary being linked at a fixed address.
pub fn pin_address_space() -> Result<()> {
    let persona = unsafe { libc::personality(0xffff_ffff) };
    if persona < 0 {
        log::debug!("personality query failed: {}", std::io::Error::last_os_error());
        return Ok(());
    }
    if persona as libc::c_ulong & ADDR_NO_RANDOMIZE != 0 {
        return Ok(());
    }
    if env::var_os(PINNED_ENV).is_some() {
        log::warn!("Address space randomisation is still on after re-exec");
        return Ok(());
    }
    if unsafe { libc::personality(persona as libc::c_ulong | ADDR_NO_RANDOMIZE) } < 0 {
        log::debug!(
            "Cannot disable address space randomisation: {}",
            std::io::Error::last_os_error()
        );
        return Ok(());
    }

    log::debug!("Re-executing with address space randomisation disabled");
    let err = Command::new("/proc/self/exe")
        .args(env::args_os().skip(1))
        .env(PINNED_ENV, "1")
        .exec();
    Err(err.into())
}
