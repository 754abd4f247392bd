//! Extension command for inspecting and loading depscope extensions
//!
//! Every subcommand builds an [`ExtensionManager`] from `depscope.toml` (or
//! the file given with `--config`) and works on its extensions directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use depscope_host::extensions::manifest::lint;
use depscope_host::extensions::{Package, StaticModuleLoader, synthesize_manifest};
use depscope_host::{CONFIG_FILE_NAME, ExtensionManager, HostConfig, HostModules};
use owo_colors::OwoColorize;
use starbase::AppResult;

use super::finish;

/// Name under which the host exposes the extension SDK to extensions
pub const SDK_MODULE_NAME: &str = "depscope-extension-sdk";

/// Load host configuration, falling back to `depscope.toml` in the current
/// directory
pub fn load_host_config(config_path: Option<&Path>) -> Result<HostConfig> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    HostConfig::load(&path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

/// Modules this host process provides to extensions
pub fn host_modules() -> HostModules {
    HostModules::new().with(
        SDK_MODULE_NAME,
        env!("CARGO_PKG_VERSION").parse().unwrap_or_default(),
    )
}

/// Extension modules compiled into this binary, served by `loader = "static"`
///
/// The stock CLI links none; hosts embedding depscope pass their own table
/// to [`ExtensionManager::from_config`].
pub fn linked_modules() -> StaticModuleLoader {
    StaticModuleLoader::new()
}

fn create_manager(config_path: Option<&Path>) -> Result<ExtensionManager> {
    let config = load_host_config(config_path)?;
    ExtensionManager::from_config(&config, &host_modules(), linked_modules())
        .context("Failed to create extension manager")
}

fn packages_for(manager: &ExtensionManager, path: Option<&Path>) -> Result<Vec<Package>> {
    match path {
        Some(path) => {
            let package = Package::from_path(path, manager.loader().as_ref())
                .with_context(|| format!("Not an extension package: {:?}", path))?;
            Ok(vec![package])
        }
        None => Ok(manager.discover()),
    }
}

/// Run the extension list command
pub async fn run_extension_list(config: Option<PathBuf>, json: bool) -> AppResult {
    finish(list_extensions(config.as_deref(), json))
}

fn list_extensions(config: Option<&Path>, json: bool) -> Result<Option<u8>> {
    let manager = create_manager(config)?;
    let packages = manager.discover();
    let manifests: Vec<_> = packages
        .iter()
        .map(|package| {
            package
                .manifest
                .clone()
                .unwrap_or_else(|| synthesize_manifest(&package.entry_module_path))
        })
        .collect();

    if json {
        let content = serde_json::to_string_pretty(&manifests)
            .context("Failed to serialize manifests")?;
        println!("{}", content);
        return Ok(None);
    }

    if manifests.is_empty() {
        println!(
            "No extensions found in {}",
            manager.extensions_dir().display()
        );
        return Ok(None);
    }

    println!("{:<24} {:<10} {:<24} Location", "Extension", "Version", "Name");
    println!("{}", "-".repeat(90));
    for (package, manifest) in packages.iter().zip(&manifests) {
        let origin = if package.manifest_path.is_some() {
            String::new()
        } else {
            format!(" {}", "(no manifest)".dimmed())
        };
        println!(
            "{:<24} {:<10} {:<24} {}{}",
            manifest.extension_id.cyan(),
            manifest.version,
            manifest.display_name,
            package.root_path.display(),
            origin
        );
    }
    println!("\nTotal: {} extension(s)", manifests.len());

    Ok(None)
}

/// Run the extension validate command
pub async fn run_extension_validate(config: Option<PathBuf>, path: Option<PathBuf>) -> AppResult {
    finish(validate_extensions(config.as_deref(), path.as_deref()).await)
}

async fn validate_extensions(config: Option<&Path>, path: Option<&Path>) -> Result<Option<u8>> {
    let manager = create_manager(config)?;
    let packages = packages_for(&manager, path)?;

    let mut failures = 0;
    for package in &packages {
        let (manifest, validation) = manager.validate_package(package).await;

        if validation.is_valid {
            println!("{} {}", "✓".green(), manifest.extension_id);
        } else {
            failures += 1;
            println!("{} {}", "✗".red(), manifest.extension_id);
        }
        for error in &validation.errors {
            println!("    {} {}", "error:".red(), error);
        }
        for warning in validation.warnings.iter().chain(lint(&manifest).iter()) {
            println!("    {} {}", "warning:".yellow(), warning);
        }
    }

    println!(
        "\n{} package(s) checked, {} with dependency errors",
        packages.len(),
        failures
    );
    Ok((failures > 0).then_some(1))
}

/// Run the extension load command
///
/// Loads extensions the way the host does at startup, reports their state,
/// then unloads them again.
pub async fn run_extension_load(config: Option<PathBuf>, path: Option<PathBuf>) -> AppResult {
    finish(load_extensions(config.as_deref(), path.as_deref()).await)
}

async fn load_extensions(config: Option<&Path>, path: Option<&Path>) -> Result<Option<u8>> {
    let manager = create_manager(config)?;

    let (attempted, loaded) = match path {
        Some(path) => match manager.load_extension(path).await {
            Ok(instance) => (1, vec![instance]),
            Err(e) => {
                eprintln!("{} {}", "Error:".red(), e);
                (1, Vec::new())
            }
        },
        None => {
            let attempted = manager.discover().len();
            (attempted, manager.load_extensions().await)
        }
    };

    for instance in &loaded {
        let manifest = instance.manifest();
        println!(
            "{} {} v{} [{}]",
            "✓".green(),
            manifest.extension_id.cyan(),
            manifest.version,
            instance.state()
        );
        let cached = instance.load_context().cached_modules();
        println!("    {} module(s) resolved", cached);
    }

    let unloaded = manager.unload_all().await;
    println!(
        "\nLoaded {} of {} extension(s), unloaded {}",
        loaded.len(),
        attempted,
        unloaded
    );

    Ok((loaded.len() < attempted).then_some(1))
}

/// Run the extension install command
pub async fn run_extension_install(config: Option<PathBuf>, path: PathBuf) -> AppResult {
    finish(install_extension(config.as_deref(), &path).await)
}

async fn install_extension(config: Option<&Path>, path: &Path) -> Result<Option<u8>> {
    let manager = create_manager(config)?;
    match manager.install_extension(path).await {
        Ok(instance) => {
            println!("✓ Installed extension '{}'", instance.extension_id());
            Ok(None)
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            Ok(Some(1))
        }
    }
}

/// Run the extension uninstall command
pub async fn run_extension_uninstall(config: Option<PathBuf>, extension_id: String) -> AppResult {
    finish(uninstall_extension(config.as_deref(), &extension_id).await)
}

async fn uninstall_extension(config: Option<&Path>, extension_id: &str) -> Result<Option<u8>> {
    let manager = create_manager(config)?;
    match manager.uninstall_extension(extension_id).await {
        Ok(_) => {
            println!("✓ Uninstalled extension '{}'", extension_id);
            Ok(None)
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            Ok(Some(1))
        }
    }
}
