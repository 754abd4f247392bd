//! Loaded code modules and the handles load contexts give out

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use depscope_extension_sdk::ExtensionFactory;

use crate::error::{HostError, Result};
use crate::extensions::version::Version;

/// Name and requested version of a module load request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: Option<String>,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Tier a module was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleOrigin {
    /// The extension's own entry module
    Entry,
    /// Already loaded by the host process
    Host,
    /// Shipped inside the extension package
    Bundled,
    /// Found in the local package cache
    External,
    /// Found next to the package or on a host search path
    Default,
}

/// A code module opened by a [`ModuleLoader`](crate::extensions::loader::ModuleLoader)
///
/// Dropping the last reference closes the module.
pub trait LoadedModule: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> Option<&Version>;

    /// Modules this one needs resolved before it can run
    fn imports(&self) -> Vec<ModuleIdentity> {
        Vec::new()
    }

    /// Extension constructors exposed by this module, in declaration order
    fn entry_points(&self) -> Vec<ExtensionFactory> {
        Vec::new()
    }
}

/// Liveness marker owned by a load context
///
/// Handles keep a weak reference; once the context drops its token every
/// handle it produced reports itself unloaded.
#[derive(Debug)]
pub(crate) struct ContextToken {
    pub(crate) extension_id: String,
}

/// A module resolved through a load context
#[derive(Clone)]
pub struct ModuleHandle {
    identity: ModuleIdentity,
    origin: ModuleOrigin,
    path: Option<PathBuf>,
    module: Arc<dyn LoadedModule>,
    owner: Weak<ContextToken>,
}

impl ModuleHandle {
    pub(crate) fn new(
        identity: ModuleIdentity,
        origin: ModuleOrigin,
        path: Option<PathBuf>,
        module: Arc<dyn LoadedModule>,
        owner: &Arc<ContextToken>,
    ) -> Self {
        Self {
            identity,
            origin,
            path,
            module,
            owner: Arc::downgrade(owner),
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Id of the extension whose context produced this handle
    pub fn owner(&self) -> Option<String> {
        self.owner.upgrade().map(|token| token.extension_id.clone())
    }

    /// False once the owning load context has been unloaded
    pub fn is_valid(&self) -> bool {
        self.owner.strong_count() > 0
    }

    /// The module, or [`HostError::ModuleUnloaded`] after unload
    pub fn module(&self) -> Result<Arc<dyn LoadedModule>> {
        if self.is_valid() {
            Ok(self.module.clone())
        } else {
            Err(HostError::ModuleUnloaded(self.identity.name.clone()))
        }
    }

    /// True if both handles refer to the same opened module
    pub fn same_module(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.module, &other.module)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("identity", &self.identity)
            .field("origin", &self.origin)
            .field("path", &self.path)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A module that belongs to the host process itself
#[derive(Debug, Clone)]
pub struct HostModule {
    name: String,
    version: Version,
}

impl HostModule {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl LoadedModule for HostModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Option<&Version> {
        Some(&self.version)
    }
}

/// Catalog of modules the host process exposes to extensions
#[derive(Clone, Default)]
pub struct HostModules {
    modules: HashMap<String, Arc<dyn LoadedModule>>,
}

impl HostModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a host module under its own name
    pub fn insert(&mut self, module: Arc<dyn LoadedModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Builder-style variant of [`insert`](Self::insert) for plain host modules
    pub fn with(mut self, name: impl Into<String>, version: Version) -> Self {
        self.insert(Arc::new(HostModule::new(name, version)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn LoadedModule>> {
        self.modules.get(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for HostModules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.modules.keys().collect();
        names.sort();
        f.debug_struct("HostModules").field("modules", &names).finish()
    }
}
