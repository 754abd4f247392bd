//! Command implementations for the depscope CLI

pub mod extension;

pub use extension::{
    run_extension_install, run_extension_list, run_extension_load, run_extension_uninstall,
    run_extension_validate,
};

use starbase::AppResult;

/// Convert a command outcome into the session result
///
/// Errors are reported with their full context chain.
pub(crate) fn finish(result: anyhow::Result<Option<u8>>) -> AppResult {
    result.map_err(|e| miette::miette!("{:#}", e))
}
