//! Prelude module for convenient imports
//!
//! ```rust
//! use depscope_extension_sdk::prelude::*;
//! ```

// Re-export all core types
pub use crate::types::{
    BundledDependency, Dependencies, ExternalDependency, HostDependency, Manifest,
};

// Re-export context capabilities
pub use crate::context::{
    Configuration, ExtensionContext, ExtensionLogger, ServiceLocator, Workspace,
};

// Re-export traits
pub use crate::traits::{Extension, ExtensionFactory};

// Re-export error types
pub use crate::error::{ExtensionError, Result};

// Re-export macros
pub use crate::export_extension;
pub use async_trait::async_trait;
