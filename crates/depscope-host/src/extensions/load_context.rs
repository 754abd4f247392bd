//! Isolated load context, one per loaded extension
//!
//! A context resolves every module the extension asks for, caches the result
//! privately and can be unloaded on its own. Unloading invalidates every
//! handle the context gave out; contexts never share cache entries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use depscope_extension_sdk::{BundledDependency, Manifest};
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::extensions::discovery::Package;
use crate::extensions::loader::{ModuleLoader, module_name_from_path};
use crate::extensions::module::{
    ContextToken, LoadedModule, ModuleHandle, ModuleIdentity, ModuleOrigin,
};
use crate::extensions::resolver::DependencyResolver;

/// Folder inside a package holding bundled dependency modules
pub const BUNDLED_DIR: &str = "Dependencies";

struct ContextState {
    /// Dropped on unload, which invalidates all handles
    token: Option<Arc<ContextToken>>,
    cache: HashMap<ModuleIdentity, ModuleHandle>,
}

/// Resolution boundary for one extension
pub struct LoadContext {
    extension_id: String,
    package: Package,
    manifest: Manifest,
    resolver: Arc<DependencyResolver>,
    loader: Arc<dyn ModuleLoader>,
    search_roots: Vec<PathBuf>,
    state: Mutex<ContextState>,
}

impl LoadContext {
    pub fn new(
        package: Package,
        manifest: Manifest,
        resolver: Arc<DependencyResolver>,
        loader: Arc<dyn ModuleLoader>,
        search_roots: Vec<PathBuf>,
    ) -> Self {
        let extension_id = manifest.extension_id.clone();
        let token = Arc::new(ContextToken {
            extension_id: extension_id.clone(),
        });
        debug!(extension_id = %extension_id, "Created load context for {:?}", package.root_path);

        Self {
            extension_id,
            package,
            manifest,
            resolver,
            loader,
            search_roots,
            state: Mutex::new(ContextState {
                token: Some(token),
                cache: HashMap::new(),
            }),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn is_unloaded(&self) -> bool {
        self.lock().token.is_none()
    }

    /// Number of modules resolved so far
    pub fn cached_modules(&self) -> usize {
        self.lock().cache.len()
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the package's entry module and resolve its imports
    ///
    /// Imports that cannot be resolved are logged; only a failure to load the
    /// entry module itself is an error.
    pub fn load_entry_module(&self) -> Result<ModuleHandle> {
        let path = self.package.entry_module_path.clone();
        let token = self.token().ok_or_else(|| {
            HostError::ModuleUnloaded(path.display().to_string())
        })?;

        let module = self
            .loader
            .load(&path)
            .map_err(|e| HostError::EntryModule {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let identity = ModuleIdentity {
            name: module.name().to_string(),
            version: Some(self.manifest.version.clone()),
        };
        let imports = module.imports();
        let handle = ModuleHandle::new(
            identity.clone(),
            ModuleOrigin::Entry,
            Some(path),
            module,
            &token,
        );
        let handle = self.insert(identity, handle)?;
        drop(token);

        for import in imports {
            if self.resolve(&import).is_none() {
                warn!(
                    extension_id = %self.extension_id,
                    module = %import,
                    "Import of entry module could not be resolved"
                );
            }
        }

        info!(
            extension_id = %self.extension_id,
            "Entry module loaded ({} module(s) resolved)",
            self.cached_modules()
        );
        Ok(handle)
    }

    /// Resolve a module request raised by the extension's code
    ///
    /// Tiers, first hit wins: cache, declared host dependency, bundled
    /// dependency, package-relative and host search paths.
    pub fn resolve(&self, identity: &ModuleIdentity) -> Option<ModuleHandle> {
        let token = {
            let state = self.lock();
            let Some(token) = state.token.clone() else {
                warn!(
                    extension_id = %self.extension_id,
                    module = %identity,
                    "Resolve requested on an unloaded context"
                );
                return None;
            };
            if let Some(handle) = state.cache.get(identity) {
                return Some(handle.clone());
            }
            token
        };

        let handle = self.resolve_uncached(identity, &token)?;
        self.insert(identity.clone(), handle).ok()
    }

    /// Seed the cache with a module resolved outside the context
    pub fn preload(
        &self,
        identity: ModuleIdentity,
        origin: ModuleOrigin,
        module: Arc<dyn LoadedModule>,
    ) -> Result<ModuleHandle> {
        let token = self
            .token()
            .ok_or_else(|| HostError::ModuleUnloaded(identity.name.clone()))?;
        let handle = ModuleHandle::new(identity.clone(), origin, None, module, &token);
        self.insert(identity, handle)
    }

    /// Locate a native library shipped with the package
    ///
    /// Only the package directory and host search paths are consulted.
    pub fn resolve_native_library(&self, name: &str) -> Option<PathBuf> {
        if self.is_unloaded() {
            return None;
        }
        let file_name = self.loader.native_library_file_name(name);
        let found = self
            .search_dirs()
            .flat_map(|dir| [dir.join(&file_name), dir.join(name)])
            .find(|candidate| candidate.is_file());

        match &found {
            Some(path) => debug!(extension_id = %self.extension_id, "Native library {} -> {:?}", name, path),
            None => debug!(extension_id = %self.extension_id, "Native library {} not found", name),
        }
        found
    }

    /// Invalidate the context and drop its cache
    ///
    /// Safe to call more than once and regardless of how the extension's own
    /// shutdown went. Other contexts are not affected.
    pub fn unload(&self) {
        let (token, cache) = {
            let mut state = self.lock();
            (state.token.take(), std::mem::take(&mut state.cache))
        };

        if token.is_some() {
            info!(
                extension_id = %self.extension_id,
                "Load context unloaded ({} module(s) released)",
                cache.len()
            );
        }
    }

    fn token(&self) -> Option<Arc<ContextToken>> {
        self.lock().token.clone()
    }

    /// Add a handle to the cache; an entry that is already there wins
    fn insert(&self, identity: ModuleIdentity, handle: ModuleHandle) -> Result<ModuleHandle> {
        let mut state = self.lock();
        if state.token.is_none() {
            return Err(HostError::ModuleUnloaded(identity.name));
        }
        Ok(state.cache.entry(identity).or_insert(handle).clone())
    }

    fn resolve_uncached(
        &self,
        identity: &ModuleIdentity,
        token: &Arc<ContextToken>,
    ) -> Option<ModuleHandle> {
        let name = identity.name.as_str();

        if let Some(dependency) = self.manifest.dependencies.host(name) {
            match self.resolver.resolve_host_dependency(name, dependency) {
                Some(module) => {
                    return Some(self.handle(identity, ModuleOrigin::Host, None, module, token));
                }
                None => warn!(
                    extension_id = %self.extension_id,
                    module = %name,
                    "Declared host dependency did not resolve, trying package locations"
                ),
            }
        }

        if let Some(dependency) = self.manifest.dependencies.bundled(name) {
            for path in self.bundled_candidates(dependency) {
                if let Some(handle) = self.try_load(identity, ModuleOrigin::Bundled, path, token) {
                    return Some(handle);
                }
            }
            warn!(
                extension_id = %self.extension_id,
                module = %name,
                "Bundled dependency not found under {}/",
                BUNDLED_DIR
            );
        }

        let file_name = self.loader.module_file_name(name);
        let candidates: Vec<PathBuf> = self.search_dirs().map(|dir| dir.join(&file_name)).collect();
        for path in candidates {
            if let Some(handle) = self.try_load(identity, ModuleOrigin::Default, path, token) {
                return Some(handle);
            }
        }

        debug!(extension_id = %self.extension_id, module = %identity, "Module not resolved");
        None
    }

    fn bundled_candidates(&self, dependency: &BundledDependency) -> Vec<PathBuf> {
        let root = &self.package.root_path;
        let mut candidates = vec![
            root.join(BUNDLED_DIR)
                .join(self.loader.module_file_name(&dependency.name)),
        ];
        candidates.extend(
            dependency
                .module_files
                .iter()
                .map(|file| root.join(file))
                .filter(|path| {
                    module_name_from_path(path).as_deref() == Some(dependency.name.as_str())
                }),
        );
        candidates
    }

    fn search_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.package.root_path).chain(self.search_roots.iter())
    }

    fn try_load(
        &self,
        identity: &ModuleIdentity,
        origin: ModuleOrigin,
        path: PathBuf,
        token: &Arc<ContextToken>,
    ) -> Option<ModuleHandle> {
        if !path.is_file() {
            return None;
        }
        match self.loader.load(&path) {
            Ok(module) => {
                debug!(
                    extension_id = %self.extension_id,
                    module = %identity,
                    tier = ?origin,
                    "Resolved {:?}",
                    path
                );
                Some(self.handle(identity, origin, Some(path), module, token))
            }
            Err(e) => {
                warn!(
                    extension_id = %self.extension_id,
                    module = %identity,
                    "Failed to load {:?}: {}",
                    path,
                    e
                );
                None
            }
        }
    }

    fn handle(
        &self,
        identity: &ModuleIdentity,
        origin: ModuleOrigin,
        path: Option<PathBuf>,
        module: Arc<dyn LoadedModule>,
        token: &Arc<ContextToken>,
    ) -> ModuleHandle {
        ModuleHandle::new(identity.clone(), origin, path, module, token)
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("extension_id", &self.extension_id)
            .field("root", &self.package.root_path)
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}
