//! Path scanner.
//!
//! Walks a directory tree and yields a [`ModuleDescriptor`] for every task
//! module file. Directories are read one at a time as the iterator advances,
//! and entries are visited in sorted file-name order.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::vec;

use tracing::{debug, trace, warn};

use super::types::{ModuleDescriptor, ModuleOrigin};

/// File extension of task modules.
pub const MODULE_EXTENSION: &str = "toml";

/// Entry module of a plugin bundle. Its tasks sit directly under the bundle namespace.
pub const BUNDLE_ENTRY_MODULE: &str = "tasks.toml";

/// Directories nested deeper than this are not descended.
pub const MAX_DEPTH: usize = 8;

/// Returns true for names the scanner never visits.
///
/// Hidden entries and `_`-prefixed entries (private modules, `_plugins`) are skipped.
pub fn is_excluded_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name.starts_with('_')
}

/// Lazy, deterministic walk over the task modules below a root directory.
///
/// Each call to [`ModuleScanner::new`] starts a fresh walk.
pub struct ModuleScanner {
    root: PathBuf,
    origin: ModuleOrigin,
    exclude: Option<PathBuf>,
    max_depth: usize,
    started: bool,
    stack: Vec<Frame>,
    /// Canonical paths of directories already entered. Stops symlink cycles.
    visited: HashSet<PathBuf>,
}

struct Frame {
    segments: Vec<String>,
    depth: usize,
    entries: vec::IntoIter<fs::DirEntry>,
}

impl ModuleScanner {
    pub fn new(root: impl Into<PathBuf>, origin: ModuleOrigin) -> Self {
        let root = root.into();
        let root = fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            origin,
            exclude: None,
            max_depth: MAX_DEPTH,
            started: false,
            stack: Vec::new(),
            visited: HashSet::new(),
        }
    }

    /// Skips a directory (typically the plugin root) if it lies inside the scan root.
    pub fn excluding(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.exclude = Some(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    fn open(&self, dir: &Path, segments: Vec<String>, depth: usize) -> Option<Frame> {
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if depth == 0 && e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Scan root does not exist: {}", dir.display());
                return None;
            }
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                return None;
            }
        };

        let mut entries: Vec<fs::DirEntry> = read
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Failed to read directory entry in {}: {}", dir.display(), e);
                    None
                }
            })
            .collect();
        entries.sort_by_key(|e| e.file_name());

        trace!("Scanning {} ({} entries)", dir.display(), entries.len());
        Some(Frame {
            segments,
            depth,
            entries: entries.into_iter(),
        })
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        match &self.exclude {
            Some(exclude) => fs::canonicalize(path)
                .map(|p| &p == exclude)
                .unwrap_or(false),
            None => false,
        }
    }

    fn is_bundle_entry(&self, depth: usize, file_name: &str) -> bool {
        depth == 0
            && matches!(self.origin, ModuleOrigin::Plugin(_))
            && file_name == BUNDLE_ENTRY_MODULE
    }
}

impl Iterator for ModuleScanner {
    type Item = ModuleDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            let root = self.root.clone();
            self.visited.insert(root.clone());
            if let Some(frame) = self.open(&root, Vec::new(), 0) {
                self.stack.push(frame);
            }
        }

        loop {
            let frame = self.stack.last_mut()?;
            let (entry, depth, mut segments) = match frame.entries.next() {
                Some(entry) => (entry, frame.depth, frame.segments.clone()),
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            let file_name = entry.file_name();
            if is_excluded_name(&file_name) {
                trace!("Skipping excluded entry: {}", entry.path().display());
                continue;
            }
            let Some(name) = file_name.to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 path: {}", entry.path().display());
                continue;
            };

            let path = entry.path();
            // Symlinks are followed, each target directory at most once.
            if path.is_dir() {
                if self.is_excluded_dir(&path) {
                    trace!("Skipping plugin directory inside root: {}", path.display());
                    continue;
                }
                if depth + 1 > self.max_depth {
                    warn!("Not descending past depth {}: {}", self.max_depth, path.display());
                    continue;
                }
                let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if !self.visited.insert(canonical) {
                    debug!("Skipping already scanned directory: {}", path.display());
                    continue;
                }
                segments.push(name);
                if let Some(child) = self.open(&path, segments, depth + 1) {
                    self.stack.push(child);
                }
                continue;
            }

            if !path.is_file() {
                continue;
            }

            let Some(stem) = name
                .strip_suffix(MODULE_EXTENSION)
                .and_then(|s| s.strip_suffix('.'))
            else {
                trace!("Skipping non-module file: {}", path.display());
                continue;
            };
            if stem.is_empty() || stem.contains('.') {
                warn!("Skipping module with unusable name: {}", path.display());
                continue;
            }

            let identifier = if self.is_bundle_entry(depth, &name) {
                String::new()
            } else {
                segments.push(stem.to_string());
                segments.join(".")
            };

            trace!("Found module `{}` at {}", identifier, path.display());
            return Some(ModuleDescriptor::new(identifier, path, self.origin.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn identifiers(scanner: ModuleScanner) -> Vec<String> {
        scanner.map(|d| d.identifier).collect()
    }

    #[test]
    fn test_scan_sorted_and_nested() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "git.toml");
        touch(dir.path(), "docker.toml");
        touch(dir.path(), "k8s/cluster.toml");
        touch(dir.path(), "k8s/helm.toml");
        touch(dir.path(), "README.md");

        let found = identifiers(ModuleScanner::new(dir.path(), ModuleOrigin::Root));
        assert_eq!(found, vec!["docker", "git", "k8s.cluster", "k8s.helm"]);
    }

    #[test]
    fn test_scan_skips_hidden_and_private() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "visible.toml");
        touch(dir.path(), ".hidden.toml");
        touch(dir.path(), "_private.toml");
        touch(dir.path(), "_plugins/extra/tasks.toml");
        touch(dir.path(), ".git/config.toml");

        let found = identifiers(ModuleScanner::new(dir.path(), ModuleOrigin::Root));
        assert_eq!(found, vec!["visible"]);
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let scanner = ModuleScanner::new(dir.path().join("missing"), ModuleOrigin::Root);
        assert_eq!(scanner.count(), 0);
    }

    #[test]
    fn test_scan_excludes_configured_directory() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "root.toml");
        touch(dir.path(), "plugins/extra.toml");

        let scanner =
            ModuleScanner::new(dir.path(), ModuleOrigin::Root).excluding(dir.path().join("plugins"));
        assert_eq!(identifiers(scanner), vec!["root"]);
    }

    #[test]
    fn test_scan_depth_bound() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/b/c/deep.toml");
        touch(dir.path(), "a/shallow.toml");

        let scanner = ModuleScanner::new(dir.path(), ModuleOrigin::Root).max_depth(1);
        assert_eq!(identifiers(scanner), vec!["a.shallow"]);
    }

    #[test]
    fn test_bundle_entry_module_has_empty_identifier() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "tasks.toml");
        touch(dir.path(), "ops/tasks.toml");

        let plugin = ModuleOrigin::Plugin("extra".into());
        let found = identifiers(ModuleScanner::new(dir.path(), plugin));
        assert_eq!(found, vec!["ops.tasks", ""]);

        // Only bundles get an entry module.
        let found = identifiers(ModuleScanner::new(dir.path(), ModuleOrigin::Root));
        assert_eq!(found, vec!["ops.tasks", "tasks"]);
    }

    #[test]
    fn test_scan_is_restartable() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "one.toml");
        touch(dir.path(), "two.toml");

        let first = identifiers(ModuleScanner::new(dir.path(), ModuleOrigin::Root));
        let second = identifiers(ModuleScanner::new(dir.path(), ModuleOrigin::Root));
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_symlink_cycle_visits_each_directory_once() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "git.toml");
        touch(dir.path(), "k8s/helm.toml");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("k8s"), dir.path().join("k8s/again")).unwrap();

        let found = identifiers(ModuleScanner::new(dir.path(), ModuleOrigin::Root));
        assert_eq!(found, vec!["git", "k8s.helm"]);
    }
}
