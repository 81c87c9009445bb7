//! Plugin bundles.
//!
//! Every visible entry of the plugin root is a bundle: a directory is scanned
//! like the tasks root, a single `.toml` file is a one-module bundle. Each
//! bundle is composed on its own and then absorbed under its name.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::composer::{Composer, Composition};
use super::loader::load_module;
use super::scanner::{is_excluded_name, ModuleScanner, MODULE_EXTENSION};
use super::types::{LoadErrorKind, ModuleDescriptor, ModuleLoadError, ModuleOrigin, NamingPolicy};

/// How a bundle is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Directory,
    SingleFile,
}

/// A named subtree (or single module file) under the plugin root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginBundle {
    pub name: String,
    pub root: PathBuf,
    pub kind: BundleKind,
}

impl PluginBundle {
    pub fn origin(&self) -> ModuleOrigin {
        ModuleOrigin::Plugin(self.name.clone())
    }

    /// Scans, loads and composes this bundle alone.
    pub fn compose(&self, policy: NamingPolicy) -> Composition {
        let mut composer = Composer::new(policy);

        if self.name.contains('.') {
            let descriptor = Arc::new(ModuleDescriptor::new("", self.root.clone(), self.origin()));
            composer.add_error(ModuleLoadError::new(
                descriptor,
                LoadErrorKind::Bundle(format!(
                    "bundle name `{}` must not contain `.`",
                    self.name
                )),
            ));
            return composer.finish();
        }

        match self.kind {
            BundleKind::Directory => {
                for descriptor in ModuleScanner::new(&self.root, self.origin()) {
                    composer.add_module(load_module(descriptor));
                }
            }
            BundleKind::SingleFile => {
                let descriptor = ModuleDescriptor::new("", self.root.clone(), self.origin());
                composer.add_module(load_module(descriptor));
            }
        }

        let composition = composer.finish();
        debug!(
            "Plugin bundle `{}` contributed {} task(s)",
            self.name,
            composition.registry.len()
        );
        composition
    }
}

/// Lists the bundles under `plugin_root`, sorted by name.
///
/// A missing plugin root yields no bundles.
pub fn discover_bundles(plugin_root: &Path) -> Vec<PluginBundle> {
    let read = match fs::read_dir(plugin_root) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Plugin directory does not exist: {}", plugin_root.display());
            return Vec::new();
        }
        Err(e) => {
            warn!(
                "Failed to read plugin directory {}: {}",
                plugin_root.display(),
                e
            );
            return Vec::new();
        }
    };

    let mut entries: Vec<_> = read.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());

    let mut bundles = Vec::new();
    for entry in entries {
        let file_name = entry.file_name();
        if is_excluded_name(&file_name) {
            trace!("Skipping excluded plugin entry: {}", entry.path().display());
            continue;
        }
        let Some(name) = file_name.to_str() else {
            warn!("Skipping non UTF-8 plugin entry: {}", entry.path().display());
            continue;
        };

        let path = entry.path();
        if path.is_dir() {
            bundles.push(PluginBundle {
                name: name.to_string(),
                root: path,
                kind: BundleKind::Directory,
            });
        } else if path.is_file() {
            let Some(stem) = name
                .strip_suffix(MODULE_EXTENSION)
                .and_then(|s| s.strip_suffix('.'))
            else {
                trace!("Skipping non-module plugin file: {}", path.display());
                continue;
            };
            bundles.push(PluginBundle {
                name: stem.to_string(),
                root: path,
                kind: BundleKind::SingleFile,
            });
        }
    }

    bundles
}

/// Composes every bundle under `plugin_root` into `composer`.
pub fn absorb_plugins(composer: &mut Composer, plugin_root: &Path) {
    for bundle in discover_bundles(plugin_root) {
        let child = bundle.compose(composer.policy());
        composer.absorb(&bundle.name, child);
    }
}
