//! Repository-local task module.
//!
//! A `local_tasks.toml` at the top level of the enclosing git repository is
//! loaded as an extra module with origin `local`.

use std::path::{Path, PathBuf};

use tracing::trace;

/// File name looked up at the repository top level.
pub const LOCAL_TASKS_FILE: &str = "local_tasks.toml";

/// Module identifier given to the local tasks module.
pub const LOCAL_TASKS_IDENTIFIER: &str = "local_tasks";

/// First ancestor of `start` (inclusive) containing `.git`.
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Path to `local_tasks.toml` of the repository enclosing `start`, if present.
pub fn find_local_tasks(start: &Path) -> Option<PathBuf> {
    let top = find_repository_root(start)?;
    let candidate = top.join(LOCAL_TASKS_FILE);
    if candidate.is_file() {
        trace!("Found local tasks at {}", candidate.display());
        Some(candidate)
    } else {
        trace!("No {} in {}", LOCAL_TASKS_FILE, top.display());
        None
    }
}
