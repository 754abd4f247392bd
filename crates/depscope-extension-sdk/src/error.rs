//! Error types for the depscope extension SDK

use thiserror::Error;

/// Result type for extension operations
pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Errors raised by extension code while the host drives its lifecycle
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// Extension initialization failed
    #[error("Failed to initialize extension: {0}")]
    InitFailed(String),

    /// Extension failed to start after initialization
    #[error("Failed to start extension: {0}")]
    StartFailed(String),

    /// Extension failed while stopping or releasing its resources
    #[error("Failed to shut down extension: {0}")]
    ShutdownFailed(String),

    /// A service the extension needs is not registered with the host
    #[error("Service not available: {0}")]
    ServiceUnavailable(String),

    /// A configuration value is missing or has the wrong shape
    #[error("Invalid configuration for '{key}': {reason}")]
    Configuration { key: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtensionError {
    /// Create a new initialization error
    pub fn init(msg: impl Into<String>) -> Self {
        ExtensionError::InitFailed(msg.into())
    }

    /// Create a new shutdown error
    pub fn shutdown(msg: impl Into<String>) -> Self {
        ExtensionError::ShutdownFailed(msg.into())
    }
}
