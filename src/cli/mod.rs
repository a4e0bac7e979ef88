//! Command-line interface
//!
//! Argument parsing and command handlers.

pub mod args;
pub mod commands;
