//! CLI module for provisr - command-line flags.

pub mod commands;

pub use commands::Cli;
