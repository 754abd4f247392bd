//! depscope CLI library
//!
//! Exposes the CLI commands for programmatic use and testing.

pub mod commands;
pub mod logging;
