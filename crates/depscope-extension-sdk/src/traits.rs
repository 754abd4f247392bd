//! Extension traits defining the contract between extensions and the host
//!
//! Extensions implement [`Extension`] and expose a factory through
//! [`export_extension!`](crate::export_extension) so the host can construct them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExtensionContext;
use crate::error::Result;

/// Base trait all extensions must implement
///
/// The host calls `initialize` once, then `start`. On unload it calls `stop`
/// followed by `dispose`, and only then releases the module the extension
/// was loaded from.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Stable extension identifier
    fn extension_id(&self) -> &str;

    /// Human-readable name
    fn display_name(&self) -> &str;

    /// Extension version
    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Receive the host capabilities. The context outlives the extension.
    async fn initialize(&mut self, context: Arc<ExtensionContext>) -> Result<()>;

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired since `initialize`
    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Constructor the host calls to instantiate an extension
pub type ExtensionFactory = fn() -> Box<dyn Extension>;
