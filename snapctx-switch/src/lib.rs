//! Context switch primitives for snapctx
//!
//! This crate provides no_std stack switching built on a hand-written
//! assembly trampoline. It's shared between the engine (with std) and
//! anything that needs to hop stacks without pulling in std.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod arch;
pub mod context;

pub use context::{Context, EntryFn};
