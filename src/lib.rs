// Core modules
pub mod arena;
pub mod error;
pub mod protocol;
pub mod region;
pub mod store;

// Running the managed task
pub mod guest;
pub mod host;
pub mod managed;
pub mod options;
pub mod tasks;

pub use error::{Result, SnapError};
