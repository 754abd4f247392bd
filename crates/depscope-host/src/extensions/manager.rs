//! Extension manager: discovery, loading and lifecycle of extensions
//!
//! The manager owns the registry of running extensions. Loading is a fixed
//! pipeline per package: manifest, duplicate check, dependency validation,
//! external dependencies, load context, entry module, entry point,
//! `initialize`, `start`, registration. A failure anywhere after the load
//! context exists unloads that context again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscope_extension_sdk::{Extension, ExtensionContext, Manifest};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::extensions::discovery::{Package, discover_packages};
use crate::extensions::host_services::HostServices;
use crate::extensions::instance::{ExtensionInstance, ExtensionState};
use crate::extensions::load_context::LoadContext;
use crate::extensions::loader::{ModuleLoader, StaticModuleLoader};
use crate::extensions::manifest::resolve_manifest;
use crate::extensions::module::{
    HostModules, LoadedModule, ModuleHandle, ModuleIdentity, ModuleOrigin,
};
use crate::extensions::resolver::{DependencyResolver, ValidationResult};

/// Extension manager owning every loaded extension
pub struct ExtensionManager {
    extensions_dir: PathBuf,
    search_roots: Vec<PathBuf>,
    loader: Arc<dyn ModuleLoader>,
    resolver: Arc<DependencyResolver>,
    services: HostServices,
    /// Running extensions by id; an extension leaves the map before it stops
    extensions: Mutex<HashMap<String, Arc<ExtensionInstance>>>,
}

impl ExtensionManager {
    /// Create a manager from host configuration and an explicit loader
    ///
    /// `host_modules` is snapshotted; modules added to the catalog later are
    /// not visible to extensions.
    pub fn new(
        config: &HostConfig,
        host_modules: &HostModules,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self> {
        let resolver =
            DependencyResolver::new(host_modules, config.package_cache_dir(), loader.clone());
        Self::with_resolver(config, resolver, loader)
    }

    /// Create a manager using the loader selected in the configuration
    ///
    /// `linked` holds the modules compiled into the host binary and is used
    /// when the configuration selects the static loader.
    pub fn from_config(
        config: &HostConfig,
        host_modules: &HostModules,
        linked: StaticModuleLoader,
    ) -> Result<Self> {
        Self::new(config, host_modules, config.build_loader(linked))
    }

    /// Create a manager around a preconfigured resolver
    pub fn with_resolver(
        config: &HostConfig,
        resolver: DependencyResolver,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self> {
        debug!(
            "Extension manager: extensions in {:?}, package cache {:?}",
            config.host.extensions_dir,
            resolver.package_cache()
        );
        Ok(Self {
            extensions_dir: config.host.extensions_dir.clone(),
            search_roots: config.host.search_paths.clone(),
            loader,
            resolver: Arc::new(resolver),
            services: HostServices::from_config(config)?,
            extensions: Mutex::new(HashMap::new()),
        })
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Shared host state; register services here before loading
    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Packages in the extensions directory, without loading them
    pub fn discover(&self) -> Vec<Package> {
        discover_packages(&self.extensions_dir, self.loader.as_ref())
    }

    /// Discover and load every package in the extensions directory
    ///
    /// Packages load one after another. A package that fails is logged and
    /// skipped; the returned list holds the ones that loaded.
    pub async fn load_extensions(&self) -> Vec<Arc<ExtensionInstance>> {
        let packages = self.discover();
        info!(
            "Loading {} extension package(s) from {:?}",
            packages.len(),
            self.extensions_dir
        );

        let mut loaded = Vec::with_capacity(packages.len());
        for package in packages {
            let manifest = resolve_manifest(package.manifest.as_ref(), &package.entry_module_path);
            let extension_id = manifest.extension_id.clone();
            let root = package.root_path.clone();
            match self.load_resolved(package, manifest).await {
                Ok(instance) => loaded.push(instance),
                Err(e) => error!(
                    extension_id = %extension_id,
                    "Failed to load extension from {:?}: {}",
                    root,
                    e
                ),
            }
        }

        info!("{} extension(s) loaded", loaded.len());
        loaded
    }

    /// Load one extension from a package directory or module file
    pub async fn load_extension(&self, path: &Path) -> Result<Arc<ExtensionInstance>> {
        let package = Package::from_path(path, self.loader.as_ref())?;
        self.load_package(package).await
    }

    /// Run the load pipeline for a discovered package
    ///
    /// Loading an id that is already running returns the existing instance.
    /// An extension that is being unloaded does not count; the package is
    /// loaded again into a fresh context.
    pub async fn load_package(&self, package: Package) -> Result<Arc<ExtensionInstance>> {
        let manifest = resolve_manifest(package.manifest.as_ref(), &package.entry_module_path);
        self.load_resolved(package, manifest).await
    }

    async fn load_resolved(
        &self,
        package: Package,
        manifest: Manifest,
    ) -> Result<Arc<ExtensionInstance>> {
        let extension_id = manifest.extension_id.clone();
        debug!(extension_id = %extension_id, state = %ExtensionState::ManifestResolved, "Loading from {:?}", package.root_path);

        if let Some(existing) = self.running(&extension_id).await {
            warn!(extension_id = %extension_id, "Extension already loaded");
            return Ok(existing);
        }

        if manifest.has_resolvable_dependencies() {
            let validation = self.resolver.validate_dependencies(&manifest).await;
            for warning in &validation.warnings {
                warn!(extension_id = %extension_id, "{}", warning);
            }
            if !validation.is_valid {
                return Err(HostError::Validation {
                    extension_id,
                    errors: validation.errors,
                });
            }
            debug!(extension_id = %extension_id, state = %ExtensionState::DependenciesValidated, "Dependencies validated");
        }

        let externals = self.resolve_externals(&manifest).await?;

        let context = LoadContext::new(
            package,
            manifest,
            self.resolver.clone(),
            self.loader.clone(),
            self.search_roots.clone(),
        );

        let (extension, extension_context, entry_module) =
            match self.activate(&context, externals).await {
                Ok(parts) => parts,
                Err(e) => {
                    context.unload();
                    return Err(e);
                }
            };

        let instance = Arc::new(ExtensionInstance::new(
            extension,
            extension_context,
            entry_module,
            context,
        ));
        instance.transition(ExtensionState::Running);

        let mut extensions = self.extensions.lock().await;
        let winner = extensions
            .get(&extension_id)
            .filter(|winner| winner.state() == ExtensionState::Running)
            .cloned();
        if let Some(winner) = winner {
            drop(extensions);
            warn!(extension_id = %extension_id, "Extension was loaded concurrently, keeping the first instance");
            instance.shutdown().await;
            return Ok(winner);
        }
        extensions.insert(extension_id.clone(), instance.clone());
        drop(extensions);

        info!(
            extension_id = %extension_id,
            "Extension loaded: {} v{}",
            instance.manifest().display_name,
            instance.manifest().version
        );
        Ok(instance)
    }

    /// Resolve external dependencies before a load context exists
    ///
    /// A missing required dependency aborts the load.
    async fn resolve_externals(
        &self,
        manifest: &Manifest,
    ) -> Result<Vec<(ModuleIdentity, Arc<dyn LoadedModule>)>> {
        let mut resolved = Vec::new();
        for dependency in &manifest.dependencies.external {
            let module = self
                .resolver
                .resolve_external_dependency(&dependency.name, dependency)
                .await?;
            if let Some(module) = module {
                resolved.push((ModuleIdentity::new(&dependency.name), module.clone()));
                resolved.push((
                    ModuleIdentity::with_version(&dependency.name, &dependency.version),
                    module,
                ));
            }
        }
        Ok(resolved)
    }

    /// Load the entry module, construct the extension and bring it up
    async fn activate(
        &self,
        context: &LoadContext,
        externals: Vec<(ModuleIdentity, Arc<dyn LoadedModule>)>,
    ) -> Result<(Box<dyn Extension>, Arc<ExtensionContext>, ModuleHandle)> {
        let extension_id = context.extension_id().to_string();

        for (identity, module) in externals {
            context.preload(identity, ModuleOrigin::External, module)?;
        }

        let entry_module = context.load_entry_module()?;
        let factories = entry_module.module()?.entry_points();
        let Some(factory) = factories.first().copied() else {
            return Err(HostError::NoEntryPoint(extension_id));
        };
        if factories.len() > 1 {
            warn!(
                extension_id = %extension_id,
                "Entry module exposes {} entry points, using the first",
                factories.len()
            );
        }

        let mut extension = factory();
        debug!(extension_id = %extension_id, state = %ExtensionState::Loaded, "Constructed {}", extension.display_name());
        let extension_context = self.services.for_extension(context.manifest());
        extension
            .initialize(extension_context.clone())
            .await
            .map_err(|e| HostError::extension(&extension_id, e))?;

        if extension.extension_id() != extension_id {
            warn!(
                extension_id = %extension_id,
                "Extension reports id '{}', registering it under the manifest id",
                extension.extension_id()
            );
        }

        if let Err(e) = extension.start().await {
            if let Err(dispose_error) = extension.dispose().await {
                warn!(extension_id = %extension_id, "dispose after failed start: {}", dispose_error);
            }
            return Err(HostError::extension(&extension_id, e));
        }

        Ok((extension, extension_context, entry_module))
    }

    /// Dependency check for a package without loading it
    pub async fn validate_package(&self, package: &Package) -> (Manifest, ValidationResult) {
        let manifest = resolve_manifest(package.manifest.as_ref(), &package.entry_module_path);
        let validation = self.resolver.validate_dependencies(&manifest).await;
        (manifest, validation)
    }

    /// Stop, dispose and unload an extension
    ///
    /// The extension leaves the registry before `stop` runs, so concurrent
    /// lookups and loads never see it half torn down. Returns `false` when no
    /// running extension has this id, including when another call is already
    /// unloading it. Failures in the extension's `stop` or `dispose` are
    /// logged; the load context is unloaded regardless.
    pub async fn unload_extension(&self, extension_id: &str) -> Result<bool> {
        let instance = self.extensions.lock().await.remove(extension_id);
        let Some(instance) = instance else {
            warn!(extension_id = %extension_id, "Extension not loaded");
            return Ok(false);
        };

        let errors = instance.shutdown().await;

        if !errors.is_empty() {
            warn!(
                extension_id = %extension_id,
                "Extension unloaded with errors: {}",
                errors.join("; ")
            );
        }
        Ok(true)
    }

    /// Unload every extension, in id order
    pub async fn unload_all(&self) -> usize {
        let ids: Vec<String> = self
            .get_extensions()
            .await
            .iter()
            .map(|instance| instance.extension_id().to_string())
            .collect();

        let mut unloaded = 0;
        for id in ids {
            if let Ok(true) = self.unload_extension(&id).await {
                unloaded += 1;
            }
        }
        unloaded
    }

    async fn running(&self, extension_id: &str) -> Option<Arc<ExtensionInstance>> {
        self.get_extension(extension_id)
            .await
            .filter(|instance| instance.state() == ExtensionState::Running)
    }

    /// Get a loaded extension
    pub async fn get_extension(&self, extension_id: &str) -> Option<Arc<ExtensionInstance>> {
        self.extensions.lock().await.get(extension_id).cloned()
    }

    /// All loaded extensions, sorted by id
    pub async fn get_extensions(&self) -> Vec<Arc<ExtensionInstance>> {
        let mut extensions: Vec<_> = self.extensions.lock().await.values().cloned().collect();
        extensions.sort_by(|a, b| a.extension_id().cmp(b.extension_id()));
        extensions
    }

    pub async fn extension_state(&self, extension_id: &str) -> Option<ExtensionState> {
        self.get_extension(extension_id)
            .await
            .map(|instance| instance.state())
    }

    pub async fn install_extension(&self, _package_path: &Path) -> Result<Arc<ExtensionInstance>> {
        Err(HostError::NotImplemented("install_extension"))
    }

    pub async fn uninstall_extension(&self, _extension_id: &str) -> Result<bool> {
        Err(HostError::NotImplemented("uninstall_extension"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::loader::{StaticModuleLoader, StaticModuleSpec};
    use depscope_extension_sdk::{ExtensionError, async_trait};
    use tempfile::tempdir;

    #[derive(Default)]
    struct Quiet;

    #[async_trait]
    impl Extension for Quiet {
        fn extension_id(&self) -> &str {
            "quiet"
        }

        fn display_name(&self) -> &str {
            "Quiet"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn initialize(
            &mut self,
            _context: Arc<ExtensionContext>,
        ) -> depscope_extension_sdk::Result<()> {
            Ok(())
        }
    }

    struct Refuses;

    #[async_trait]
    impl Extension for Refuses {
        fn extension_id(&self) -> &str {
            "refuses"
        }

        fn display_name(&self) -> &str {
            "Refuses"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn initialize(
            &mut self,
            _context: Arc<ExtensionContext>,
        ) -> depscope_extension_sdk::Result<()> {
            Err(ExtensionError::init("no graph store"))
        }
    }

    fn quiet() -> Box<dyn Extension> {
        Box::new(Quiet)
    }

    fn refuses() -> Box<dyn Extension> {
        Box::new(Refuses)
    }

    fn manager(extensions_dir: PathBuf) -> ExtensionManager {
        let loader = StaticModuleLoader::new()
            .with_module("quiet", StaticModuleSpec::new().with_entry_point(quiet))
            .with_module("refuses", StaticModuleSpec::new().with_entry_point(refuses))
            .with_module("inert", StaticModuleSpec::new());
        let mut config = HostConfig::default();
        config.host.package_cache_dir = Some(extensions_dir.join(".cache"));
        config.host.extensions_dir = extensions_dir;
        ExtensionManager::new(&config, &HostModules::new(), Arc::new(loader)).unwrap()
    }

    fn module_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(format!("{}.dsm", name));
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path().to_path_buf());
        let path = module_file(temp.path(), "quiet");

        let first = manager.load_extension(&path).await.unwrap();
        let second = manager.load_extension(&path).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.get_extensions().await.len(), 1);
        assert_eq!(
            manager.extension_state("quiet").await,
            Some(ExtensionState::Running)
        );
    }

    #[tokio::test]
    async fn test_load_uses_manifest_read_at_discovery() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path().to_path_buf());
        let dir = temp.path().join("quiet-package");
        std::fs::create_dir(&dir).unwrap();
        module_file(&dir, "quiet");
        let manifest_path = dir.join(crate::extensions::MANIFEST_FILE_NAME);
        std::fs::write(
            &manifest_path,
            r#"{"extensionId": "graph.quiet", "entryModule": "quiet.dsm"}"#,
        )
        .unwrap();

        let package = manager.discover().remove(0);
        std::fs::remove_file(&manifest_path).unwrap();

        let instance = manager.load_package(package).await.unwrap();
        assert_eq!(instance.extension_id(), "graph.quiet");
    }

    #[tokio::test]
    async fn test_module_without_entry_point() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path().to_path_buf());
        let path = module_file(temp.path(), "inert");

        let result = manager.load_extension(&path).await;
        assert!(matches!(result, Err(HostError::NoEntryPoint(id)) if id == "inert"));
        assert!(manager.get_extension("inert").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_initialize_is_not_registered() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path().to_path_buf());
        let path = module_file(temp.path(), "refuses");

        let result = manager.load_extension(&path).await;
        assert!(matches!(result, Err(HostError::Extension { .. })));
        assert!(manager.get_extensions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unload_unknown_extension() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path().to_path_buf());
        assert!(!manager.unload_extension("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_unload_releases_context() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path().to_path_buf());
        let instance = manager
            .load_extension(&module_file(temp.path(), "quiet"))
            .await
            .unwrap();
        let entry = instance.entry_module().clone();

        assert!(manager.unload_extension("quiet").await.unwrap());
        assert_eq!(instance.state(), ExtensionState::Unloaded);
        assert!(instance.load_context().is_unloaded());
        assert!(!entry.is_valid());
        assert!(manager.extension_state("quiet").await.is_none());
    }

    #[tokio::test]
    async fn test_install_and_uninstall_not_implemented() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path().to_path_buf());
        assert!(matches!(
            manager.install_extension(temp.path()).await,
            Err(HostError::NotImplemented(_))
        ));
        assert!(matches!(
            manager.uninstall_extension("quiet").await,
            Err(HostError::NotImplemented(_))
        ));
    }
}
