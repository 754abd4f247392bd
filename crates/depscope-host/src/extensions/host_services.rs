//! Capabilities the host shares with every extension
//!
//! One [`HostServices`] lives in the manager; each successful load gets an
//! [`ExtensionContext`] built from it.

use std::sync::Arc;

use depscope_extension_sdk::{
    Configuration, ExtensionContext, Manifest, ServiceLocator, Workspace,
};

use crate::config::HostConfig;
use crate::error::Result;

/// Host state shared with extensions
#[derive(Debug, Clone, Default)]
pub struct HostServices {
    configuration: Arc<Configuration>,
    workspace: Arc<Workspace>,
    services: Arc<ServiceLocator>,
}

impl HostServices {
    pub fn new(configuration: Configuration, workspace: Workspace) -> Self {
        Self {
            configuration: Arc::new(configuration),
            workspace: Arc::new(workspace),
            services: Arc::new(ServiceLocator::new()),
        }
    }

    /// Create host services for a configured workspace
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        Ok(Self::new(config.configuration()?, config.workspace()))
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Registry the host fills with services before loading extensions
    pub fn service_locator(&self) -> &Arc<ServiceLocator> {
        &self.services
    }

    /// Context handed to `initialize` for one extension
    pub fn for_extension(&self, manifest: &Manifest) -> Arc<ExtensionContext> {
        Arc::new(ExtensionContext::new(
            manifest.clone(),
            self.configuration.clone(),
            self.workspace.clone(),
            self.services.clone(),
        ))
    }
}
