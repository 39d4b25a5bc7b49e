//! Checkpoint/restore protocol
//!
//! The task side lives in [`crate::managed`]: it arms the latch, records
//! a hand-off request and switches to the home context. Everything below
//! runs on the home context while the task is suspended, so the region
//! can be written out or overwritten without anything executing on it.
//!
//! The latch is what keeps a replayed capture from saving again. It is
//! `PendingSave` only between the capture and the end of the write, so the
//! image on disk always carries `PendingSave`; the load path clears it
//! before the captured context is resumed.

use crate::error::{Result, SnapError};
use crate::region::Region;
use crate::store::SnapshotStore;
use snapctx_switch::EntryFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Phase {
    Idle = 0,
    PendingSave = 1,
}

impl TryFrom<u32> for Phase {
    type Error = SnapError;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Phase::Idle),
            1 => Ok(Phase::PendingSave),
            other => Err(SnapError::BadHeader {
                reason: format!("unknown latch phase {}", other),
            }),
        }
    }
}

/// Two-state latch around the capture/persist pair. Stored in the region
/// header as a raw word so an image can never hold an invalid enum.
#[derive(Debug, Default)]
#[repr(C)]
pub struct SaveLatch {
    raw: u32,
}

impl SaveLatch {
    pub const fn new() -> Self {
        Self { raw: Phase::Idle as u32 }
    }

    pub fn phase(&self) -> Result<Phase> {
        Phase::try_from(self.raw)
    }

    pub fn is_pending(&self) -> bool {
        self.raw == Phase::PendingSave as u32
    }

    /// Idle -> PendingSave. Arming twice means a save was re-entered.
    pub fn arm(&mut self) -> Result<()> {
        match self.phase()? {
            Phase::Idle => {
                self.raw = Phase::PendingSave as u32;
                Ok(())
            }
            Phase::PendingSave => Err(SnapError::Protocol(
                "checkpoint requested while a save is still pending".into(),
            )),
        }
    }

    /// PendingSave -> Idle once the image is on disk.
    pub fn complete(&mut self) -> Result<()> {
        match self.phase()? {
            Phase::PendingSave => {
                self.raw = Phase::Idle as u32;
                Ok(())
            }
            Phase::Idle => Err(SnapError::Protocol(
                "save completed without a pending capture".into(),
            )),
        }
    }

    /// Force Idle, returning whatever was there.
    pub fn clear(&mut self) -> u32 {
        std::mem::replace(&mut self.raw, Phase::Idle as u32)
    }
}

/// Request left in the header by the task before it yields to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Handoff {
    None = 0,
    Save = 1,
    SaveAndExit = 2,
    Restore = 3,
    Finished = 4,
    Failed = 5,
}

impl TryFrom<u32> for Handoff {
    type Error = SnapError;

    fn try_from(raw: u32) -> Result<Self> {
        Ok(match raw {
            0 => Handoff::None,
            1 => Handoff::Save,
            2 => Handoff::SaveAndExit,
            3 => Handoff::Restore,
            4 => Handoff::Finished,
            5 => Handoff::Failed,
            other => {
                return Err(SnapError::BadHeader {
                    reason: format!("unknown hand-off request {}", other),
                })
            }
        })
    }
}

/// Word passed from host to task on every switch into the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Wake {
    Started = 0,
    Saved = 1,
    Restored = 2,
}

impl TryFrom<usize> for Wake {
    type Error = SnapError;

    fn try_from(raw: usize) -> Result<Self> {
        match raw {
            0 => Ok(Wake::Started),
            1 => Ok(Wake::Saved),
            2 => Ok(Wake::Restored),
            other => Err(SnapError::Protocol(format!("unknown wake code {}", other))),
        }
    }
}

/// Write the suspended region to the store and complete the latch.
pub fn persist(region: &mut Region, store: &SnapshotStore) -> Result<()> {
    if !region.header().latch.is_pending() {
        return Err(SnapError::Protocol(
            "save requested without an armed latch".into(),
        ));
    }

    log::info!("Saving state to {}", store.path().display());
    store.write(region.as_bytes())?;
    region.header_mut().latch.complete()?;

    log::debug!("Wrote {} bytes", region.layout().len());
    Ok(())
}

/// Overwrite the region with the stored image and make it resumable.
///
/// Must only run on the home context: the task's stack is replaced.
pub fn load(region: &mut Region, store: &SnapshotStore, entry: EntryFn) -> Result<()> {
    log::info!("Restoring from saved state in {}", store.path().display());
    store.read_into(region.as_bytes_mut())?;
    region.validate(entry)?;

    let header = region.header_mut();
    if header.latch.clear() != Phase::Idle as u32 {
        log::debug!("Cleared save latch carried by the image");
    }
    header.handoff = Handoff::None as u32;

    log::info!(
        "State loaded, resuming context at sp {:#x}",
        header.captured.stack_pointer()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_toggles_once_around_save() {
        let mut latch = SaveLatch::new();
        assert_eq!(latch.phase().unwrap(), Phase::Idle);

        latch.arm().unwrap();
        assert!(latch.is_pending());
        assert!(matches!(latch.arm(), Err(SnapError::Protocol(_))));

        latch.complete().unwrap();
        assert_eq!(latch.phase().unwrap(), Phase::Idle);
        assert!(latch.complete().is_err());
    }

    #[test]
    fn test_latch_clear_reports_previous_state() {
        let mut latch = SaveLatch::new();
        latch.arm().unwrap();
        assert_eq!(latch.clear(), Phase::PendingSave as u32);
        assert!(!latch.is_pending());
        assert_eq!(latch.clear(), Phase::Idle as u32);
    }

    #[test]
    fn test_garbage_latch_is_rejected() {
        let mut latch = SaveLatch { raw: 7 };
        assert!(matches!(latch.phase(), Err(SnapError::BadHeader { .. })));
        assert!(latch.arm().is_err());
    }

    #[test]
    fn test_handoff_and_wake_decoding() {
        assert_eq!(Handoff::try_from(2).unwrap(), Handoff::SaveAndExit);
        assert_eq!(Handoff::try_from(5).unwrap(), Handoff::Failed);
        assert!(Handoff::try_from(99).is_err());
        assert_eq!(Wake::try_from(Wake::Restored as usize).unwrap(), Wake::Restored);
        assert!(Wake::try_from(3).is_err());
    }
}
