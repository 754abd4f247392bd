//! A loaded extension and its lifecycle state

use std::fmt;
use std::sync::{Arc, Mutex};

use depscope_extension_sdk::{Extension, ExtensionContext, Manifest};
use tracing::{debug, info, warn};

use crate::extensions::discovery::Package;
use crate::extensions::load_context::LoadContext;
use crate::extensions::module::ModuleHandle;

/// Lifecycle of an extension, from discovery to unload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionState {
    /// Package found on disk
    Discovered,
    /// Manifest read or synthesized
    ManifestResolved,
    /// Host dependencies checked
    DependenciesValidated,
    /// Entry module loaded and extension constructed
    Loaded,
    /// Initialized, started and registered
    Running,
    /// Shutdown in progress
    Unloading,
    /// Load context released
    Unloaded,
}

impl ExtensionState {
    /// Whether the lifecycle may move from `self` to `next`
    ///
    /// Validation is skipped for packages without resolvable dependencies.
    /// `Unloaded` is only reachable through `Running`.
    pub fn can_transition_to(self, next: ExtensionState) -> bool {
        use ExtensionState::*;
        matches!(
            (self, next),
            (Discovered, ManifestResolved)
                | (ManifestResolved, DependenciesValidated)
                | (ManifestResolved, Loaded)
                | (DependenciesValidated, Loaded)
                | (Loaded, Running)
                | (Running, Unloading)
                | (Unloading, Unloaded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionState::Discovered => "discovered",
            ExtensionState::ManifestResolved => "manifest-resolved",
            ExtensionState::DependenciesValidated => "dependencies-validated",
            ExtensionState::Loaded => "loaded",
            ExtensionState::Running => "running",
            ExtensionState::Unloading => "unloading",
            ExtensionState::Unloaded => "unloaded",
        }
    }
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime container for a loaded extension
///
/// Field order matters: the extension object is dropped before the entry
/// module handle and load context, so no extension code outlives the module
/// it came from.
pub struct ExtensionInstance {
    extension: tokio::sync::Mutex<Box<dyn Extension>>,
    context: Arc<ExtensionContext>,
    state: Mutex<ExtensionState>,
    entry_module: ModuleHandle,
    load_context: LoadContext,
}

impl ExtensionInstance {
    pub(crate) fn new(
        extension: Box<dyn Extension>,
        context: Arc<ExtensionContext>,
        entry_module: ModuleHandle,
        load_context: LoadContext,
    ) -> Self {
        Self {
            extension: tokio::sync::Mutex::new(extension),
            context,
            state: Mutex::new(ExtensionState::Loaded),
            entry_module,
            load_context,
        }
    }

    pub fn extension_id(&self) -> &str {
        self.load_context.extension_id()
    }

    pub fn manifest(&self) -> &Manifest {
        self.load_context.manifest()
    }

    pub fn package(&self) -> &Package {
        self.load_context.package()
    }

    pub fn load_context(&self) -> &LoadContext {
        &self.load_context
    }

    pub fn entry_module(&self) -> &ModuleHandle {
        &self.entry_module
    }

    /// The context the extension was initialized with
    pub fn context(&self) -> &Arc<ExtensionContext> {
        &self.context
    }

    /// Exclusive access to the extension object
    pub async fn extension(&self) -> tokio::sync::MutexGuard<'_, Box<dyn Extension>> {
        self.extension.lock().await
    }

    pub fn state(&self) -> ExtensionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next` if the lifecycle allows it
    pub(crate) fn transition(&self, next: ExtensionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.can_transition_to(next) {
            debug!(extension_id = %self.extension_id(), "{} -> {}", *state, next);
            *state = next;
            true
        } else {
            debug!(
                extension_id = %self.extension_id(),
                "Ignoring transition {} -> {}",
                *state,
                next
            );
            false
        }
    }

    /// Stop and dispose the extension, then unload its context
    ///
    /// Failures from extension code are collected and returned; the context
    /// is unloaded regardless. Only the first call does any work.
    pub(crate) async fn shutdown(&self) -> Vec<String> {
        if !self.transition(ExtensionState::Unloading) {
            return Vec::new();
        }

        let mut errors = Vec::new();
        {
            let mut extension = self.extension.lock().await;
            if let Err(e) = extension.stop().await {
                warn!(extension_id = %self.extension_id(), "stop failed: {}", e);
                errors.push(format!("stop: {}", e));
            }
            if let Err(e) = extension.dispose().await {
                warn!(extension_id = %self.extension_id(), "dispose failed: {}", e);
                errors.push(format!("dispose: {}", e));
            }
        }

        self.load_context.unload();
        self.transition(ExtensionState::Unloaded);
        info!(extension_id = %self.extension_id(), "Extension unloaded");
        errors
    }
}

impl fmt::Debug for ExtensionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionInstance")
            .field("extension_id", &self.extension_id())
            .field("state", &self.state())
            .field("entry_module", &self.entry_module)
            .finish()
    }
}
