//! Task module discovery and composition.
//!
//! Discovery runs as an explicit pipeline:
//! 1. **Scan** the tasks root for module files ([`scanner`])
//! 2. **Load** each module into task definitions ([`loader`])
//! 3. **Compose** them into one registry, detecting collisions ([`composer`])
//! 4. **Absorb** the repository `local_tasks.toml` and every plugin bundle
//!    ([`local`], [`plugins`])
//!
//! Failures never abort the pipeline. They are collected in the
//! [`DiscoveryReport`] next to a usable [`TaskRegistry`].

pub mod composer;
pub mod loader;
pub mod local;
pub mod plugins;
pub mod scanner;
pub mod types;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Settings;

pub use composer::{compose, Composer, Composition, DiscoveryReport, TaskRegistry};
pub use loader::{load_module, parse_module, render_placeholders, LoadedModule};
pub use local::{find_local_tasks, find_repository_root, LOCAL_TASKS_FILE, LOCAL_TASKS_IDENTIFIER};
pub use plugins::{discover_bundles, BundleKind, PluginBundle};
pub use scanner::ModuleScanner;
pub use types::{
    LoadErrorKind, ModuleDescriptor, ModuleLoadError, ModuleOrigin, NamingCollision, NamingPolicy,
    TaskDefinition, TaskLookupError, TaskParam, ToolRequirement,
};

/// Inputs of one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub root: PathBuf,
    /// `None` disables plugins.
    pub plugin_root: Option<PathBuf>,
    /// Path to a `local_tasks.toml`; `None` disables it.
    pub local_tasks: Option<PathBuf>,
    pub policy: NamingPolicy,
}

impl DiscoveryOptions {
    pub fn new(root: impl Into<PathBuf>, policy: NamingPolicy) -> Self {
        Self {
            root: root.into(),
            plugin_root: None,
            local_tasks: None,
            policy,
        }
    }

    /// Derives options from settings, looking for local tasks above `cwd`.
    pub fn from_settings(settings: &Settings, cwd: &Path) -> Self {
        Self {
            root: settings.tasks_root.clone(),
            plugin_root: settings.load_plugins.then(|| settings.plugin_root()),
            local_tasks: if settings.load_local_tasks {
                find_local_tasks(cwd)
            } else {
                None
            },
            policy: settings.naming,
        }
    }

    pub fn with_plugins(mut self, plugin_root: impl Into<PathBuf>) -> Self {
        self.plugin_root = Some(plugin_root.into());
        self
    }

    pub fn with_local_tasks(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_tasks = Some(path.into());
        self
    }
}

/// Runs the whole discovery pipeline. Always returns a composition.
pub fn discover(options: &DiscoveryOptions) -> Composition {
    debug!(
        root = %options.root.display(),
        policy = ?options.policy,
        "Discovering task modules"
    );

    let mut composer = Composer::new(options.policy);
    let mut seen = HashSet::new();

    let mut scanner = ModuleScanner::new(&options.root, ModuleOrigin::Root);
    if let Some(plugin_root) = &options.plugin_root {
        scanner = scanner.excluding(plugin_root);
    }
    for descriptor in scanner {
        seen.insert(descriptor.location.clone());
        composer.add_module(load_module(descriptor));
    }

    if let Some(path) = &options.local_tasks {
        let location = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        if seen.contains(&location) {
            debug!(
                "{} is already part of the tasks root",
                location.display()
            );
        } else {
            let descriptor =
                ModuleDescriptor::new(LOCAL_TASKS_IDENTIFIER, location, ModuleOrigin::Local);
            composer.add_module(load_module(descriptor));
        }
    }

    if let Some(plugin_root) = &options.plugin_root {
        plugins::absorb_plugins(&mut composer, plugin_root);
    }

    let composition = composer.finish();
    info!(
        "Discovered {} task(s), {} load error(s), {} collision(s)",
        composition.registry.len(),
        composition.report.load_errors.len(),
        composition.report.collisions.len()
    );
    composition
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn task(name: &str) -> String {
        format!("[[tasks]]\nname = \"{}\"\nrun = \"echo {}\"\n", name, name)
    }

    #[test]
    fn test_plugins_under_root_are_not_scanned_twice() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "git.toml", &task("alias-setup"));
        write(dir.path(), "_plugins/extra/tasks.toml", &task("hello"));

        let options = DiscoveryOptions::new(dir.path(), NamingPolicy::PrefixPreserving)
            .with_plugins(dir.path().join("_plugins"));
        let composition = discover(&options);

        let names: Vec<_> = composition.registry.names().collect();
        assert_eq!(names, vec!["extra.hello", "git.alias-setup"]);
        assert!(composition.report.is_empty());
    }

    #[test]
    fn test_local_tasks_module() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tasks");
        write(&root, "docker.toml", &task("build-image"));
        write(dir.path(), "repo/local_tasks.toml", &task("create-local-dev-cluster"));

        let options = DiscoveryOptions::new(&root, NamingPolicy::PrefixPreserving)
            .with_local_tasks(dir.path().join("repo/local_tasks.toml"));
        let composition = discover(&options);

        let task = composition
            .lookup("local_tasks.create-local-dev-cluster")
            .unwrap();
        assert_eq!(task.module.origin, ModuleOrigin::Local);
        assert!(composition.registry.contains("docker.build-image"));
    }

    #[test]
    fn test_local_tasks_inside_root_loaded_once() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "local_tasks.toml", &task("setup"));

        let options = DiscoveryOptions::new(dir.path(), NamingPolicy::Flattened)
            .with_local_tasks(dir.path().join("local_tasks.toml"));
        let composition = discover(&options);

        assert!(composition.report.collisions.is_empty());
        assert!(composition.registry.contains("setup"));
    }

    #[test]
    fn test_options_from_settings() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            tasks_root: dir.path().to_path_buf(),
            load_plugins: false,
            load_local_tasks: false,
            naming: NamingPolicy::PrefixPreserving,
            ..Settings::default()
        };

        let options = DiscoveryOptions::from_settings(&settings, dir.path());
        assert_eq!(options.plugin_root, None);
        assert_eq!(options.local_tasks, None);
        assert_eq!(options.policy, NamingPolicy::PrefixPreserving);

        let settings = Settings {
            load_plugins: true,
            ..settings
        };
        let options = DiscoveryOptions::from_settings(&settings, dir.path());
        assert_eq!(options.plugin_root, Some(dir.path().join("_plugins")));
    }
}
