//! depscope Extension SDK
//!
//! This crate defines the contract between the depscope host and the
//! extensions it loads. An extension is a native module exposing a single,
//! versioned entry point that constructs its capability object.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use depscope_extension_sdk::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct CycleReport {
//!     context: Option<Arc<ExtensionContext>>,
//! }
//!
//! #[async_trait]
//! impl Extension for CycleReport {
//!     fn extension_id(&self) -> &str { "cycle-report" }
//!     fn display_name(&self) -> &str { "Cycle Report" }
//!     fn version(&self) -> &str { env!("CARGO_PKG_VERSION") }
//!
//!     async fn initialize(&mut self, context: Arc<ExtensionContext>) -> Result<()> {
//!         context.logger().info("cycle report ready");
//!         self.context = Some(context);
//!         Ok(())
//!     }
//! }
//!
//! depscope_extension_sdk::export_extension!(CycleReport);
//! ```

pub mod context;
pub mod error;
pub mod prelude;
pub mod traits;
pub mod types;

// Re-exports
pub use async_trait::async_trait;
pub use context::{Configuration, ExtensionContext, ExtensionLogger, ServiceLocator, Workspace};
pub use error::{ExtensionError, Result};
pub use traits::{Extension, ExtensionFactory};
pub use types::*;

/// Name of the symbol every native extension module exports
///
/// The suffix is the entry point ABI version; it changes whenever the
/// [`Extension`] trait changes incompatibly.
pub const ENTRY_SYMBOL: &str = "depscope_extension_entry_v1";

/// Entry point ABI version encoded in [`ENTRY_SYMBOL`]
pub const ENTRY_ABI_VERSION: u32 = 1;

/// Export an extension implementation as the module entry point
///
/// The type must implement [`Extension`] and [`Default`]. This generates
/// the `depscope_extension_entry_v1` symbol the host looks up after opening
/// the module. Host and extension must be built with the same toolchain.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct MyExtension;
///
/// #[async_trait]
/// impl Extension for MyExtension { /* ... */ }
///
/// depscope_extension_sdk::export_extension!(MyExtension);
/// ```
#[macro_export]
macro_rules! export_extension {
    ($impl:ty) => {
        /// Extension entry point (required by host)
        #[unsafe(no_mangle)]
        pub fn depscope_extension_entry_v1() -> ::std::boxed::Box<dyn $crate::Extension> {
            ::std::boxed::Box::new(<$impl as ::std::default::Default>::default())
        }
    };
}
