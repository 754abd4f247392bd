//! depscope host - extension hosting and dependency resolution
//!
//! This crate loads depscope extensions and keeps them isolated:
//! - Package discovery and manifest handling (`extension.json`)
//! - Dependency resolution against host modules, bundled files and the
//!   local package cache
//! - One load context per extension, unloadable on its own
//! - Extension lifecycle management

pub mod config;
pub mod error;
pub mod extensions;

pub use config::{CONFIG_FILE_NAME, HostConfig, LoaderKind};
pub use error::{HostError, Result};
pub use extensions::{ExtensionInstance, ExtensionManager, ExtensionState, HostModules};
