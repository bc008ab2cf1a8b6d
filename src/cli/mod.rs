//! Command-line interface for upkeep.
//!
//! Every option can also come from the environment, so a container can be
//! configured without a custom entrypoint.

pub mod args;

pub use args::Cli;
