//! Dependency resolution against the host and the local package cache

use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscope_extension_sdk::{ExternalDependency, HostDependency, Manifest};
use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::extensions::loader::ModuleLoader;
use crate::extensions::module::{HostModules, LoadedModule};
use crate::extensions::version::{Version, is_version_compatible};

/// Outcome of validating a manifest's dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// What the resolver knows about the running host
#[derive(Debug, Clone)]
pub struct HostIdentity {
    /// Host version checked against `hostVersion` in manifests
    pub version: Version,
    /// Runtime identifier checked against `targetRuntime`
    pub runtime: String,
}

impl Default for HostIdentity {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").parse().unwrap_or_default(),
            runtime: HOST_RUNTIME.to_string(),
        }
    }
}

/// Runtime identifier of this host build
pub const HOST_RUNTIME: &str = "native";

/// Resolves declared dependencies for load contexts
///
/// The set of host modules is captured when the resolver is created.
pub struct DependencyResolver {
    host_modules: HostModules,
    package_cache: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    host: HostIdentity,
}

impl DependencyResolver {
    pub fn new(
        host_modules: &HostModules,
        package_cache: PathBuf,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        Self {
            host_modules: host_modules.clone(),
            package_cache,
            loader,
            host: HostIdentity::default(),
        }
    }

    pub fn with_host_identity(mut self, host: HostIdentity) -> Self {
        self.host = host;
        self
    }

    pub fn package_cache(&self) -> &Path {
        &self.package_cache
    }

    /// Look up a host module and check it against the declared version spec
    ///
    /// Missing or incompatible modules resolve to `None`.
    pub fn resolve_host_dependency(
        &self,
        module_name: &str,
        dependency: &HostDependency,
    ) -> Option<Arc<dyn LoadedModule>> {
        let module = self.host_modules.get(module_name)?;

        if is_version_compatible(module.version(), Some(&dependency.version_spec)) {
            debug!(module = %module_name, "Resolved host dependency");
            Some(module.clone())
        } else {
            warn!(
                module = %module_name,
                "Host module version mismatch: required {}, host provides {}",
                dependency.version_spec,
                display_version(module.version()),
            );
            None
        }
    }

    /// Look up an external dependency in the package cache
    ///
    /// The cache entry is the directory `{cache}/{name}.{version}`. A miss is
    /// an error for required dependencies and `Ok(None)` for optional ones.
    pub async fn resolve_external_dependency(
        &self,
        module_name: &str,
        dependency: &ExternalDependency,
    ) -> Result<Option<Arc<dyn LoadedModule>>> {
        match self.load_from_cache(module_name, dependency).await {
            Ok(module) => {
                debug!(module = %module_name, "Resolved external dependency from cache");
                Ok(Some(module))
            }
            Err(e) if dependency.optional => {
                warn!(module = %module_name, "Optional dependency not resolved: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn load_from_cache(
        &self,
        module_name: &str,
        dependency: &ExternalDependency,
    ) -> Result<Arc<dyn LoadedModule>> {
        let entry = self.cache_entry(dependency);
        let module_path = entry.join(self.loader.module_file_name(module_name));

        if !tokio::fs::try_exists(&module_path).await? {
            return Err(HostError::resolution(
                module_name,
                format!(
                    "{}.{} is not in the package cache at {:?}",
                    dependency.name, dependency.version, self.package_cache
                ),
            ));
        }

        self.loader.load(&module_path)
    }

    /// Cache directory for one external dependency
    pub fn cache_entry(&self, dependency: &ExternalDependency) -> PathBuf {
        self.package_cache
            .join(format!("{}.{}", dependency.name, dependency.version))
    }

    /// Check that every host-provided dependency is present and compatible
    ///
    /// External dependencies are not checked here; they are resolved when
    /// the extension loads.
    pub async fn validate_dependencies(&self, manifest: &Manifest) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for dependency in &manifest.dependencies.host_provided {
            match self.host_modules.get(&dependency.name) {
                None => errors.push(format!(
                    "host dependency '{}' is not provided by the host",
                    dependency.name
                )),
                Some(module)
                    if !is_version_compatible(module.version(), Some(&dependency.version_spec)) =>
                {
                    errors.push(format!(
                        "host dependency '{}' requires version {}, host provides {}",
                        dependency.name,
                        dependency.version_spec,
                        display_version(module.version()),
                    ))
                }
                Some(_) => {}
            }
        }

        if let Ok(required) = manifest.minimum_host_version.parse::<Version>() {
            if required > self.host.version {
                warnings.push(format!(
                    "extension targets host {} or newer, running {}",
                    required, self.host.version
                ));
            }
        }

        let runtime = manifest.target_runtime.trim();
        if !runtime.is_empty() && !runtime.eq_ignore_ascii_case(&self.host.runtime) {
            warnings.push(format!(
                "extension targets runtime '{}', host runtime is '{}'",
                runtime, self.host.runtime
            ));
        }

        for error in &errors {
            warn!(extension_id = %manifest.extension_id, "{}", error);
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

fn display_version(version: Option<&Version>) -> String {
    version
        .map(Version::to_string)
        .unwrap_or_else(|| "no version".to_string())
}
