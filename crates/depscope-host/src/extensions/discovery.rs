//! Extension package discovery
//!
//! Discovery enumerates the filesystem and parses each manifest once; the
//! parsed manifest travels with the package to load time.

use std::path::{Path, PathBuf};

use depscope_extension_sdk::Manifest;
use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::extensions::loader::ModuleLoader;
use crate::extensions::manifest::{MANIFEST_FILE_NAME, load_manifest};

/// A discovered, not yet loaded extension package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Package directory (the parent directory for loose module files)
    pub root_path: PathBuf,
    /// Manifest file, if the package has one
    pub manifest_path: Option<PathBuf>,
    /// Manifest parsed from `manifest_path`; `None` when absent or unreadable
    pub manifest: Option<Manifest>,
    /// Entry module file
    pub entry_module_path: PathBuf,
}

impl Package {
    /// Package made of a single module file with no manifest
    pub fn loose(entry_module_path: PathBuf) -> Self {
        let root_path = entry_module_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            root_path,
            manifest_path: None,
            manifest: None,
            entry_module_path,
        }
    }

    /// Build the package for a path given by a user: a package directory or
    /// a module file
    pub fn from_path(path: &Path, loader: &dyn ModuleLoader) -> Result<Self> {
        if path.is_dir() {
            package_from_directory(path, loader).ok_or_else(|| {
                HostError::Manifest(format!(
                    "{:?} has neither {} nor an entry module",
                    path, MANIFEST_FILE_NAME
                ))
            })
        } else if path.is_file() {
            Ok(Package::loose(path.to_path_buf()))
        } else {
            Err(HostError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("extension path not found: {:?}", path),
            )))
        }
    }
}

/// Enumerate extension packages under `directory`
///
/// Finds subdirectories with a manifest (or with a single module named after
/// the directory) and loose module files. A missing directory yields an
/// empty list. Results are sorted by path.
pub fn discover_packages(directory: &Path, loader: &dyn ModuleLoader) -> Vec<Package> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Extension directory {:?} is not readable: {}", directory, e);
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {}", directory, e);
                None
            }
        })
        .collect();
    paths.sort();

    let mut packages = Vec::new();
    for path in paths {
        if path.is_dir() {
            match package_from_directory(&path, loader) {
                Some(package) => packages.push(package),
                None => debug!("Skipping {:?}: not an extension package", path),
            }
        } else if loader.is_module_file(&path) {
            packages.push(Package::loose(path));
        }
    }

    debug!("Discovered {} extension package(s) in {:?}", packages.len(), directory);
    packages
}

fn package_from_directory(dir: &Path, loader: &dyn ModuleLoader) -> Option<Package> {
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    if manifest_path.is_file() {
        let manifest = load_manifest(&manifest_path);
        let entry_module_path = entry_module_for(dir, manifest.as_ref(), loader);
        return Some(Package {
            root_path: dir.to_path_buf(),
            manifest_path: Some(manifest_path),
            manifest,
            entry_module_path,
        });
    }

    let dir_name = dir.file_name()?.to_string_lossy().into_owned();
    let entry_module_path = dir.join(loader.module_file_name(&dir_name));
    entry_module_path.is_file().then(|| Package {
        root_path: dir.to_path_buf(),
        manifest_path: None,
        manifest: None,
        entry_module_path,
    })
}

/// Entry module declared by the manifest, or the module named after the
/// directory when the manifest is unreadable or does not declare one
fn entry_module_for(
    dir: &Path,
    manifest: Option<&Manifest>,
    loader: &dyn ModuleLoader,
) -> PathBuf {
    let declared = manifest
        .map(|manifest| manifest.entry_module.as_str())
        .filter(|entry| !entry.trim().is_empty());

    match declared {
        Some(entry) => dir.join(entry),
        None => {
            let dir_name = dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            dir.join(loader.module_file_name(&dir_name))
        }
    }
}
