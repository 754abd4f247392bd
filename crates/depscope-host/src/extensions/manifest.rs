//! Reading, writing and synthesizing extension manifests
//!
//! Manifest files are JSON. Field names are matched case-insensitively on
//! read and written back in camelCase.

use std::path::{Component, Path};

use depscope_extension_sdk::Manifest;
use serde_json::Value;
use tracing::{error, warn};

use crate::error::{HostError, Result};
use crate::extensions::version::Version;

/// File name of the manifest inside a package directory
pub const MANIFEST_FILE_NAME: &str = "extension.json";

/// Every field name a manifest document may contain, in canonical casing
const KNOWN_FIELDS: &[&str] = &[
    "extensionId",
    "version",
    "displayName",
    "description",
    "author",
    "entryModule",
    "targetRuntime",
    "hostVersion",
    "dependencies",
    "hostProvided",
    "bundled",
    "external",
    "name",
    "versionSpec",
    "moduleFiles",
    "source",
    "optional",
];

/// Parse manifest JSON, accepting field names in any casing
pub fn parse_manifest(content: &str) -> Result<Manifest> {
    let mut document: Value = serde_json::from_str(content)?;
    normalize_keys(&mut document);
    let manifest = serde_json::from_value(document)?;
    Ok(manifest)
}

/// Serialize a manifest as pretty-printed camelCase JSON
pub fn to_json_pretty(manifest: &Manifest) -> Result<String> {
    Ok(serde_json::to_string_pretty(manifest)?)
}

/// Read the manifest at `path`
///
/// Any failure is logged and reported as `None`; callers fall back to
/// [`synthesize_manifest`].
pub fn load_manifest(path: &Path) -> Option<Manifest> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to read manifest {:?}: {}", path, e);
            return None;
        }
    };

    match parse_manifest(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            error!("Failed to parse manifest {:?}: {}", path, e);
            None
        }
    }
}

/// Build a minimal manifest for a package that has none
///
/// The entry module's base name becomes both id and display name.
pub fn synthesize_manifest(entry_module_path: &Path) -> Manifest {
    let stem = entry_module_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut manifest = Manifest::new(stem);
    manifest.entry_module = entry_module_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    manifest
}

/// Non-fatal problems with a manifest
pub fn lint(manifest: &Manifest) -> Vec<String> {
    let mut warnings = Vec::new();

    if manifest.extension_id.trim().is_empty() {
        warnings.push("extensionId is empty".to_string());
    }
    if manifest.version.parse::<Version>().is_err() {
        warnings.push(format!(
            "version '{}' is not a dotted numeric version",
            manifest.version
        ));
    }
    if escapes_root(Path::new(&manifest.entry_module)) {
        warnings.push(format!(
            "entryModule '{}' points outside the package",
            manifest.entry_module
        ));
    }
    for bundled in &manifest.dependencies.bundled {
        for file in &bundled.module_files {
            if escapes_root(Path::new(file)) {
                warnings.push(format!(
                    "bundled module file '{}' of '{}' points outside the package",
                    file, bundled.name
                ));
            }
        }
    }

    warnings
}

/// The manifest read at discovery, or one synthesized from the entry module,
/// logging lint warnings
pub(crate) fn resolve_manifest(discovered: Option<&Manifest>, entry_module: &Path) -> Manifest {
    let manifest = discovered
        .cloned()
        .unwrap_or_else(|| synthesize_manifest(entry_module));

    for warning in lint(&manifest) {
        warn!(extension_id = %manifest.extension_id, "Manifest: {}", warning);
    }

    manifest
}

/// Require a usable manifest, for callers that cannot fall back
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)?;
    parse_manifest(&content).map_err(|e| HostError::Manifest(format!("{:?}: {}", path, e)))
}

fn escapes_root(path: &Path) -> bool {
    path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
}

fn normalize_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            for (key, mut child) in entries {
                normalize_keys(&mut child);
                let canonical = KNOWN_FIELDS
                    .iter()
                    .find(|known| known.eq_ignore_ascii_case(&key))
                    .map(|known| known.to_string())
                    .unwrap_or(key);
                map.insert(canonical, child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_keys),
        _ => {}
    }
}
