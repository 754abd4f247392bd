//! Core types for the depscope extension system
//!
//! These types are shared between extensions and the host.

use serde::{Deserialize, Serialize};

/// Version assigned to manifests synthesized for packages without one
pub const DEFAULT_EXTENSION_VERSION: &str = "1.0.0";

/// Declarative metadata describing an extension package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Unique, stable extension identifier
    pub extension_id: String,
    /// Dotted numeric version (e.g. "1.4.2")
    #[serde(default = "default_version")]
    pub version: String,
    /// Human-readable name
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Entry module path, relative to the package root
    #[serde(default)]
    pub entry_module: String,
    /// Runtime the extension was built against
    #[serde(default)]
    pub target_runtime: String,
    /// Oldest host version the extension supports
    #[serde(default, rename = "hostVersion")]
    pub minimum_host_version: String,
    #[serde(default)]
    pub dependencies: Dependencies,
}

fn default_version() -> String {
    DEFAULT_EXTENSION_VERSION.to_string()
}

impl Manifest {
    /// Create a manifest with the given id and defaults everywhere else
    pub fn new(extension_id: impl Into<String>) -> Self {
        let extension_id = extension_id.into();
        Self {
            display_name: extension_id.clone(),
            extension_id,
            version: default_version(),
            description: String::new(),
            author: String::new(),
            entry_module: String::new(),
            target_runtime: String::new(),
            minimum_host_version: String::new(),
            dependencies: Dependencies::default(),
        }
    }

    /// True if the host has to check or fetch anything before loading
    pub fn has_resolvable_dependencies(&self) -> bool {
        !self.dependencies.host_provided.is_empty() || !self.dependencies.external.is_empty()
    }
}

/// The three dependency categories a package can declare
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependencies {
    /// Modules the host process must already provide
    #[serde(default)]
    pub host_provided: Vec<HostDependency>,
    /// Modules shipped inside the package
    #[serde(default)]
    pub bundled: Vec<BundledDependency>,
    /// Modules resolved from the local package cache
    #[serde(default)]
    pub external: Vec<ExternalDependency>,
}

impl Dependencies {
    pub fn host(&self, name: &str) -> Option<&HostDependency> {
        self.host_provided.iter().find(|d| d.name == name)
    }

    pub fn bundled(&self, name: &str) -> Option<&BundledDependency> {
        self.bundled.iter().find(|d| d.name == name)
    }

    pub fn external(&self, name: &str) -> Option<&ExternalDependency> {
        self.external.iter().find(|d| d.name == name)
    }
}

/// A module the host must already expose, matched by exact name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDependency {
    pub name: String,
    /// Exact version ("1.2.3") or interval ("[1.0,2.0)")
    #[serde(default)]
    pub version_spec: String,
}

/// A module the package ships under its `Dependencies/` folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Files making up the module, relative to the package root
    #[serde(default)]
    pub module_files: Vec<String>,
}

/// A module looked up in the local package cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Where the package would be fetched from; informational only
    #[serde(default)]
    pub source: String,
    /// When false, failing to resolve aborts the extension load
    #[serde(default)]
    pub optional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults() {
        let manifest: Manifest = serde_json::from_str(r#"{"extensionId": "graph.export"}"#).unwrap();
        assert_eq!(manifest.version, DEFAULT_EXTENSION_VERSION);
        assert!(manifest.dependencies.host_provided.is_empty());
        assert!(!manifest.has_resolvable_dependencies());
    }

    #[test]
    fn test_host_version_field_name() {
        let mut manifest = Manifest::new("graph.export");
        manifest.minimum_host_version = "2.1".into();
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["hostVersion"], "2.1");
        assert_eq!(json["displayName"], "graph.export");
    }

    #[test]
    fn test_dependency_lookup() {
        let mut manifest = Manifest::new("graph.export");
        manifest.dependencies.external.push(ExternalDependency {
            name: "Csv.Writer".into(),
            version: "3.0.1".into(),
            source: "https://packages.example.org".into(),
            optional: true,
        });
        assert!(manifest.has_resolvable_dependencies());
        assert!(manifest.dependencies.external("Csv.Writer").is_some());
        assert!(manifest.dependencies.bundled("Csv.Writer").is_none());
    }
}
