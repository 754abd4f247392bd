//! Host capabilities handed to an extension at initialization
//!
//! The host builds one [`ExtensionContext`] per successful load and passes it
//! to [`Extension::initialize`](crate::Extension::initialize). The context is
//! never mutated afterwards; configuration, workspace and services are shared
//! with every other extension.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ExtensionError, Result};
use crate::types::Manifest;

/// Capability bundle for one loaded extension
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    logger: ExtensionLogger,
    configuration: Arc<Configuration>,
    workspace: Arc<Workspace>,
    services: Arc<ServiceLocator>,
    manifest: Manifest,
}

impl ExtensionContext {
    pub fn new(
        manifest: Manifest,
        configuration: Arc<Configuration>,
        workspace: Arc<Workspace>,
        services: Arc<ServiceLocator>,
    ) -> Self {
        Self {
            logger: ExtensionLogger::new(manifest.extension_id.clone()),
            configuration,
            workspace,
            services,
            manifest,
        }
    }

    pub fn logger(&self) -> &ExtensionLogger {
        &self.logger
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn service_locator(&self) -> &ServiceLocator {
        &self.services
    }

    /// The manifest the extension was loaded with (possibly synthesized)
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

/// Logger scoped to one extension
///
/// Every event carries the extension id as a structured `extension_id` field.
#[derive(Debug, Clone)]
pub struct ExtensionLogger {
    extension_id: String,
}

impl ExtensionLogger {
    pub fn new(extension_id: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(extension_id = %self.extension_id, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(extension_id = %self.extension_id, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(extension_id = %self.extension_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(extension_id = %self.extension_id, "{}", message);
    }
}

/// Shared configuration object
///
/// A JSON object of host settings. Each extension conventionally reads its
/// own section keyed by its extension id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: serde_json::Map<String, serde_json::Value>,
}

impl Configuration {
    pub fn new(values: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { values }
    }

    /// Raw value for a top-level key
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Deserialize a top-level key into `T`; `Ok(None)` when absent
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ExtensionError::Configuration {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// The sub-table for one extension, empty if not configured
    pub fn section(&self, extension_id: &str) -> Configuration {
        match self.values.get(extension_id) {
            Some(serde_json::Value::Object(map)) => Configuration::new(map.clone()),
            _ => Configuration::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Workspace information shared with extensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace root path
    pub root: PathBuf,
    /// Output directory path
    pub output_dir: PathBuf,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            output_dir: PathBuf::from(".depscope"),
        }
    }
}

/// Type-keyed registry of shared host services
#[derive(Default)]
pub struct ServiceLocator {
    services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one of the same type
    pub fn register<T: Any + Send + Sync>(&self, service: Arc<T>) {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        services.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Like [`get`](Self::get) but reports a missing service as an error
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get::<T>()
            .ok_or_else(|| ExtensionError::ServiceUnavailable(std::any::type_name::<T>().into()))
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("services", &self.len())
            .finish()
    }
}
