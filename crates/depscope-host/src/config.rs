//! Host configuration
//!
//! Loaded from `depscope.toml`. Every section is optional and a missing file
//! yields the defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscope_extension_sdk::{Configuration, Workspace};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HostError, Result};
use crate::extensions::loader::{ModuleLoader, NativeModuleLoader, StaticModuleLoader};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "depscope.toml";

/// Root configuration from depscope.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,

    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default)]
    pub extensions: ExtensionsSection,
}

/// [host] section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSection {
    /// Directory scanned for extension packages
    #[serde(default = "default_extensions_dir")]
    pub extensions_dir: PathBuf,
    /// Local package cache for external dependencies
    #[serde(default)]
    pub package_cache_dir: Option<PathBuf>,
    /// Extra directories probed by the default resolution tier
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Module loader used to open extension modules
    #[serde(default)]
    pub loader: LoaderKind,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            extensions_dir: default_extensions_dir(),
            package_cache_dir: None,
            search_paths: Vec::new(),
            loader: LoaderKind::default(),
        }
    }
}

fn default_extensions_dir() -> PathBuf {
    PathBuf::from("extensions")
}

/// Which [`ModuleLoader`] the host uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    /// Platform dynamic libraries
    #[default]
    Native,
    /// Modules linked into the host binary
    Static,
}

/// [workspace] section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSection {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".depscope")
}

/// [extensions] section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionsSection {
    /// Settings shared with every extension, one sub-table per extension id
    #[serde(default)]
    pub settings: toml::Table,
}

impl HostConfig {
    /// Load configuration from a file path
    ///
    /// A missing file yields the defaults. Relative paths in the file are
    /// taken relative to the directory containing it.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No host configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        debug!("Loaded host configuration from {:?}", path);
        Ok(config)
    }

    /// Parse configuration text without touching the filesystem
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Make every relative path absolute against `base`
    pub fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        rebase(&mut self.host.extensions_dir);
        if let Some(cache) = self.host.package_cache_dir.as_mut() {
            rebase(cache);
        }
        self.host.search_paths.iter_mut().for_each(rebase);
        rebase(&mut self.workspace.root);
        rebase(&mut self.workspace.output_dir);
    }

    /// Package cache directory, defaulting to the user cache directory
    pub fn package_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.host.package_cache_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .map(|dir| dir.join("depscope").join("packages"))
            .unwrap_or_else(|| self.workspace.output_dir.join("packages"))
    }

    /// The `[extensions.settings]` table as the configuration object handed
    /// to extensions
    pub fn configuration(&self) -> Result<Configuration> {
        match serde_json::to_value(&self.extensions.settings)? {
            serde_json::Value::Object(values) => Ok(Configuration::new(values)),
            other => Err(HostError::Config(format!(
                "[extensions.settings] must be a table, found {}",
                other
            ))),
        }
    }

    pub fn workspace(&self) -> Workspace {
        Workspace {
            root: self.workspace.root.clone(),
            output_dir: self.workspace.output_dir.clone(),
        }
    }

    /// Module loader selected by `[host] loader`
    ///
    /// `linked` is the table of modules compiled into the host. It becomes
    /// the loader when `loader = "static"` and is dropped otherwise.
    pub fn build_loader(&self, linked: StaticModuleLoader) -> Arc<dyn ModuleLoader> {
        match self.host.loader {
            LoaderKind::Native => Arc::new(NativeModuleLoader::new()),
            LoaderKind::Static => {
                debug!("Using the static module loader: {:?}", linked);
                Arc::new(linked)
            }
        }
    }
}
