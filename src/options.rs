//! Run configuration
//!
//! What the binary parsed from its arguments, in the shape the host
//! driver consumes.

use std::path::{Path, PathBuf};

use crate::region::Layout;
use crate::tasks::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Start a new task in a fresh region
    Fresh { task: Task, snapshot: PathBuf },
    /// Load the region from a snapshot and resume it
    Restore { snapshot: PathBuf },
}

impl Mode {
    pub fn snapshot(&self) -> &Path {
        match self {
            Mode::Fresh { snapshot, .. } | Mode::Restore { snapshot } => snapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub layout: Layout,
    pub mode: Mode,
}

/// Parse an address given as `0x`-prefixed hex or as decimal.
pub fn parse_address(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse::<usize>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

/// Parse a byte count with an optional `K`, `M` or `G` suffix (powers of two).
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last() {
        Some((i, 'k' | 'K')) => (&s[..i], 10),
        Some((i, 'm' | 'M')) => (&s[..i], 20),
        Some((i, 'g' | 'G')) => (&s[..i], 30),
        _ => (s, 0),
    };
    let n = parse_address(digits).map_err(|_| format!("invalid size '{}'", s))?;
    n.checked_mul(1usize << shift)
        .ok_or_else(|| format!("size '{}' is too large", s))
}
