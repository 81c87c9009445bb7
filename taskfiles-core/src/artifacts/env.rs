//! Environment helpers for resolved artifacts.
//!
//! Resolved executables are exposed to task scripts by prepending their bin
//! directories to `PATH`.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use tracing::debug;

use super::error::ArtifactError;
use super::types::CachedArtifact;

/// Returns the distinct bin directories of `artifacts`, in order.
pub fn bin_dirs<'a>(artifacts: impl IntoIterator<Item = &'a CachedArtifact>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for artifact in artifacts {
        if let Some(dir) = artifact.bin_dir() {
            let dir = dir.to_path_buf();
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs
}

/// Prepends `dirs` to an existing PATH value.
///
/// Entries of `existing` that repeat one of `dirs` are dropped. With no
/// `existing`, the process PATH is used.
pub fn prepend_to_path(
    dirs: &[PathBuf],
    existing: Option<&OsStr>,
) -> Result<OsString, ArtifactError> {
    let base = existing
        .map(OsStr::to_os_string)
        .or_else(|| std::env::var_os("PATH"))
        .unwrap_or_default();

    if dirs.is_empty() {
        return Ok(base);
    }

    let mut entries: Vec<PathBuf> = Vec::new();
    for dir in dirs.iter().cloned().chain(std::env::split_paths(&base)) {
        if dir.as_os_str().is_empty() || entries.contains(&dir) {
            continue;
        }
        entries.push(dir);
    }

    debug!("Prepending {} bin dir(s) to PATH", dirs.len());
    std::env::join_paths(entries).map_err(|e| {
        ArtifactError::io(
            "failed to build PATH",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        )
    })
}
