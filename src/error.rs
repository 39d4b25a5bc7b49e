use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::arena::ArenaError;

#[derive(Error, Debug)]
pub enum SnapError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot map {len:#x} bytes at fixed address {addr:#x}: {source}")]
    MapFixed {
        addr: usize,
        len: usize,
        source: io::Error,
    },

    #[error("Kernel placed the region at {actual:#x} instead of {expected:#x}")]
    AddressMoved { expected: usize, actual: usize },

    #[error("Snapshot {} is truncated: expected {expected} bytes, found {actual}", path.display())]
    ShortRead {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Snapshot {} carries {extra} bytes beyond the {expected}-byte region", path.display())]
    TrailingBytes {
        path: PathBuf,
        expected: u64,
        extra: u64,
    },

    #[error("Invalid region layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Snapshot does not match this region: {reason}")]
    LayoutMismatch { reason: String },

    #[error("Snapshot was produced by a different build (entry {saved:#x}, this binary {current:#x})")]
    BuildMismatch { saved: usize, current: usize },

    #[error("Corrupt region header: {reason}")]
    BadHeader { reason: String },

    #[error("Checkpoint protocol violation: {0}")]
    Protocol(String),

    #[error("Arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("Managed task failed")]
    TaskFailed,
}

pub type Result<T> = std::result::Result<T, SnapError>;
