//! Extension hosting
//!
//! Packages are discovered on disk, their manifests resolved, and each
//! extension is loaded into its own [`LoadContext`] so that it can be
//! unloaded independently of every other extension.

pub mod discovery;
pub mod host_services;
pub mod instance;
pub mod load_context;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod module;
pub mod resolver;
pub mod version;

pub use discovery::{Package, discover_packages};
pub use host_services::HostServices;
pub use instance::{ExtensionInstance, ExtensionState};
pub use load_context::LoadContext;
pub use loader::{ModuleLoader, NativeModuleLoader, StaticModuleLoader, StaticModuleSpec};
pub use manager::ExtensionManager;
pub use manifest::{MANIFEST_FILE_NAME, load_manifest, synthesize_manifest};
pub use module::{HostModules, LoadedModule, ModuleHandle, ModuleIdentity, ModuleOrigin};
pub use resolver::{DependencyResolver, HostIdentity, ValidationResult};
pub use version::{Version, is_version_compatible};
