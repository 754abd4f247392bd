//! Module loaders
//!
//! A [`ModuleLoader`] opens module files for load contexts. The native
//! loader opens platform dynamic libraries; the static loader serves modules
//! compiled into the host binary, keyed by module name, so that packages can
//! be discovered and hosted without shipping native code.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use depscope_extension_sdk::{ENTRY_SYMBOL, ExtensionFactory};
use libloading::Library;
use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::extensions::module::{LoadedModule, ModuleIdentity};
use crate::extensions::version::Version;

/// File extension used by modules served from the static table
pub const STATIC_MODULE_EXTENSION: &str = "dsm";

/// Opens module files on behalf of load contexts
pub trait ModuleLoader: Send + Sync {
    /// File name a module called `module_name` is expected to have
    fn module_file_name(&self, module_name: &str) -> String;

    /// Whether `path` looks like a module this loader can open
    fn is_module_file(&self, path: &Path) -> bool;

    /// Open the module at `path`
    ///
    /// Every call returns a fresh module object, so two contexts loading the
    /// same file never share state through it.
    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedModule>>;

    /// File name of a platform native library called `name`
    fn native_library_file_name(&self, name: &str) -> String {
        libloading::library_filename(name)
            .to_string_lossy()
            .into_owned()
    }
}

/// Module name derived from a module file path
///
/// Strips the extension and, for platform libraries, the `lib` prefix.
pub fn module_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem().and_then(OsStr::to_str)?;
    let is_native = path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION);
    let name = if is_native && !std::env::consts::DLL_PREFIX.is_empty() {
        stem.strip_prefix(std::env::consts::DLL_PREFIX).unwrap_or(stem)
    } else {
        stem
    };
    Some(name.to_string())
}

/// Loader for extensions built as platform dynamic libraries
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleLoader;

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn module_file_name(&self, module_name: &str) -> String {
        self.native_library_file_name(module_name)
    }

    fn is_module_file(&self, path: &Path) -> bool {
        path.extension().and_then(OsStr::to_str) == Some(std::env::consts::DLL_EXTENSION)
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedModule>> {
        let name = module_name_from_path(path)
            .ok_or_else(|| HostError::resolution(path.display().to_string(), "no file name"))?;

        debug!(module = %name, "Opening native module {:?}", path);

        // SAFETY: opening a library runs its initializers. Extension packages
        // are trusted code by the time they reach the loader.
        let library = unsafe { Library::new(path) }
            .map_err(|e| HostError::resolution(&name, e.to_string()))?;

        Ok(Arc::new(NativeModule { name, library }))
    }
}

/// An opened dynamic library; closed when dropped
struct NativeModule {
    name: String,
    library: Library,
}

impl LoadedModule for NativeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Option<&Version> {
        None
    }

    fn entry_points(&self) -> Vec<ExtensionFactory> {
        // SAFETY: the symbol is generated by `export_extension!` with the
        // `ExtensionFactory` signature. The function pointer stays valid for
        // as long as this module is alive, and extension instances hold the
        // module until their extension object has been dropped.
        match unsafe { self.library.get::<ExtensionFactory>(ENTRY_SYMBOL.as_bytes()) } {
            Ok(symbol) => vec![*symbol],
            Err(e) => {
                warn!(module = %self.name, "Entry symbol {} not found: {}", ENTRY_SYMBOL, e);
                Vec::new()
            }
        }
    }
}

/// Description of a module compiled into the host
#[derive(Clone, Default)]
pub struct StaticModuleSpec {
    version: Option<Version>,
    imports: Vec<ModuleIdentity>,
    entry_points: Vec<ExtensionFactory>,
}

impl StaticModuleSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_import(mut self, import: ModuleIdentity) -> Self {
        self.imports.push(import);
        self
    }

    pub fn with_entry_point(mut self, factory: ExtensionFactory) -> Self {
        self.entry_points.push(factory);
        self
    }
}

/// Loader backed by a table of modules linked into the host binary
///
/// The package still ships a `<name>.dsm` marker file; it is what discovery
/// finds and what the loader requires to exist before serving the module.
#[derive(Clone, Default)]
pub struct StaticModuleLoader {
    modules: HashMap<String, StaticModuleSpec>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, spec: StaticModuleSpec) {
        self.modules.insert(name.into(), spec);
    }

    pub fn with_module(mut self, name: impl Into<String>, spec: StaticModuleSpec) -> Self {
        self.register(name, spec);
        self
    }
}

impl fmt::Debug for StaticModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.modules.keys().collect();
        names.sort();
        f.debug_struct("StaticModuleLoader")
            .field("modules", &names)
            .finish()
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn module_file_name(&self, module_name: &str) -> String {
        format!("{}.{}", module_name, STATIC_MODULE_EXTENSION)
    }

    fn is_module_file(&self, path: &Path) -> bool {
        path.extension().and_then(OsStr::to_str) == Some(STATIC_MODULE_EXTENSION)
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedModule>> {
        let name = module_name_from_path(path)
            .ok_or_else(|| HostError::resolution(path.display().to_string(), "no file name"))?;

        if !path.is_file() {
            return Err(HostError::resolution(
                &name,
                format!("module file not found: {:?}", path),
            ));
        }

        let spec = self.modules.get(&name).ok_or_else(|| {
            HostError::resolution(&name, "no module with this name is linked into the host")
        })?;

        debug!(module = %name, "Serving static module for {:?}", path);

        Ok(Arc::new(StaticModule {
            name,
            spec: spec.clone(),
        }))
    }
}

struct StaticModule {
    name: String,
    spec: StaticModuleSpec,
}

impl LoadedModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Option<&Version> {
        self.spec.version.as_ref()
    }

    fn imports(&self) -> Vec<ModuleIdentity> {
        self.spec.imports.clone()
    }

    fn entry_points(&self) -> Vec<ExtensionFactory> {
        self.spec.entry_points.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_module_name_from_path() {
        assert_eq!(
            module_name_from_path(Path::new("/ext/cycles.dsm")).as_deref(),
            Some("cycles")
        );
        let native = NativeModuleLoader::new().module_file_name("cycles");
        assert_eq!(
            module_name_from_path(Path::new(&native)).as_deref(),
            Some("cycles")
        );
    }

    #[test]
    fn test_static_loader_requires_file() {
        let temp = tempdir().unwrap();
        let loader = StaticModuleLoader::new().with_module(
            "cycles",
            StaticModuleSpec::new().with_version("1.2".parse().unwrap()),
        );
        let path = temp.path().join(loader.module_file_name("cycles"));
        assert!(loader.load(&path).is_err());

        std::fs::write(&path, b"").unwrap();
        let module = loader.load(&path).unwrap();
        assert_eq!(module.name(), "cycles");
        assert_eq!(module.version().unwrap().to_string(), "1.2");
    }

    #[test]
    fn test_static_loader_returns_fresh_modules() {
        let temp = tempdir().unwrap();
        let loader = StaticModuleLoader::new().with_module("cycles", StaticModuleSpec::new());
        let path = temp.path().join("cycles.dsm");
        std::fs::write(&path, b"").unwrap();

        let first = loader.load(&path).unwrap();
        let second = loader.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_static_loader_unknown_module() {
        let temp = tempdir().unwrap();
        let loader = StaticModuleLoader::new();
        let path = temp.path().join("unknown.dsm");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            loader.load(&path),
            Err(HostError::Resolution { .. })
        ));
    }

    #[test]
    fn test_native_loader_rejects_non_library() {
        let temp = tempdir().unwrap();
        let loader = NativeModuleLoader::new();
        let path = temp.path().join(loader.module_file_name("broken"));
        std::fs::write(&path, b"not a shared object").unwrap();

        assert!(loader.is_module_file(&path));
        assert!(loader.load(&path).is_err());
    }
}
