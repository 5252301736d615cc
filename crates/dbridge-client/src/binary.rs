//! Bridge server binary lookup.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use dbridge_core::constants::{SDK_ROOT_VARS, SERVER_BINARY_NAME};
use dbridge_core::{BridgeConfig, Error, Result};

/// Locate the server binary for `config`.
///
/// Search order: the configured path, `<sdk>/platform-tools` for each SDK
/// root variable, then every `$PATH` entry.
pub fn locate_server_binary(config: &BridgeConfig) -> Result<PathBuf> {
    locate_with(
        config.server_binary.as_deref(),
        |key| env::var_os(key),
        SERVER_BINARY_NAME,
    )
}

pub(crate) fn locate_with(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<OsString>,
    name: &str,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::BinaryNotFound {
            message: format!("{} does not exist", path.display()),
        });
    }

    let sdk_candidates = SDK_ROOT_VARS
        .iter()
        .filter_map(|var| lookup(*var))
        .map(|root| PathBuf::from(root).join("platform-tools").join(name));
    let path_candidates = lookup("PATH")
        .map(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for candidate in sdk_candidates.chain(path_candidates) {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "found server binary");
            return Ok(candidate);
        }
    }

    Err(Error::BinaryNotFound {
        message: format!("{} not found in SDK platform-tools or PATH", name),
    })
}
