//! upkeep - a self-updating process supervisor
//!
//! Keeps one application process running, checks its git checkout for new
//! revisions on an interval and restarts the process cleanly when it changed.

pub mod app;
pub mod config;
pub mod error;
pub mod process;
pub mod retry;
pub mod revision;
pub mod setup;
pub mod shutdown;
pub mod supervisor;
pub mod termination;

pub use error::{Result, UpkeepError};
