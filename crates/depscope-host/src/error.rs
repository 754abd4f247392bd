//! Error types for the depscope extension host

use thiserror::Error;

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur while hosting extensions
#[derive(Debug, Error)]
pub enum HostError {
    /// Manifest could not be read or is unusable
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Host-provided dependencies are missing or incompatible
    #[error("Dependency validation failed for '{extension_id}': {}", .errors.join("; "))]
    Validation {
        extension_id: String,
        errors: Vec<String>,
    },

    /// A required module could not be resolved in any tier
    #[error("Failed to resolve module '{module}': {reason}")]
    Resolution { module: String, reason: String },

    /// The extension's own entry module failed to load
    #[error("Failed to load entry module {path:?}: {reason}")]
    EntryModule {
        path: std::path::PathBuf,
        reason: String,
    },

    /// The entry module exposes no extension factory
    #[error("Entry module for '{0}' exposes no extension entry point")]
    NoEntryPoint(String),

    /// Extension code failed during a lifecycle call
    #[error("Extension '{extension_id}' failed: {source}")]
    Extension {
        extension_id: String,
        #[source]
        source: depscope_extension_sdk::ExtensionError,
    },

    /// A module handle was used after its load context was unloaded
    #[error("Module '{0}' belongs to an unloaded load context")]
    ModuleUnloaded(String),

    /// Operation is declared but not supported by this host
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HostError {
    pub fn resolution(module: impl Into<String>, reason: impl Into<String>) -> Self {
        HostError::Resolution {
            module: module.into(),
            reason: reason.into(),
        }
    }

    pub fn extension(
        extension_id: impl Into<String>,
        source: depscope_extension_sdk::ExtensionError,
    ) -> Self {
        HostError::Extension {
            extension_id: extension_id.into(),
            source,
        }
    }
}
