//! Runtime settings for taskfiles.
//!
//! Settings are read from `TASKS_*` environment variables. The lookup is
//! injectable so tests never have to mutate the process environment.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::discovery::NamingPolicy;

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Root directory holding the task modules.
pub const ENV_ROOT: &str = "TASKS_ROOT";
/// Keep module identifiers as a task-name prefix.
pub const ENV_KEEP_PREFIX: &str = "TASKS_KEEP_MODULE_NAME_PREFIX";
/// Enable or disable plugin bundles.
pub const ENV_LOAD_PLUGINS: &str = "TASKS_LOAD_PLUGINS";
/// Override for the plugin root (defaults to `<root>/_plugins`).
pub const ENV_PLUGIN_DIR: &str = "TASKS_PLUGIN_DIR";
/// Enable or disable the repository `local_tasks.toml` module.
pub const ENV_LOCAL_TASKS: &str = "TASKS_LOCAL_TASKS";
/// Artifact cache root.
pub const ENV_CACHE_DIR: &str = "TASKS_CACHE_DIR";
/// Verbose tracing of module loading and composition.
pub const ENV_DEBUG: &str = "TASKS_DEBUG";
/// Base log level.
pub const ENV_LOGLEVEL: &str = "TASKS_LOGLEVEL";

/// Name of the plugin directory inside the tasks root.
pub const PLUGINS_DIR_NAME: &str = "_plugins";

/// Subdirectory of the OS cache dir used for artifacts.
const CACHE_SUBDIR: &str = "taskfiles";

// =============================================================================
// Settings
// =============================================================================

/// Settings for a single invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory scanned for root task modules.
    pub tasks_root: PathBuf,

    /// Plugin root override. `None` means `<tasks_root>/_plugins`.
    pub plugin_dir: Option<PathBuf>,

    /// Whether plugin bundles are loaded at all.
    pub load_plugins: bool,

    /// Whether `local_tasks.toml` at the repository top level is loaded.
    pub load_local_tasks: bool,

    /// Visible-name policy.
    pub naming: NamingPolicy,

    /// Root of the on-disk artifact cache.
    pub cache_dir: PathBuf,

    /// Verbose tracing of discovery.
    pub debug: bool,

    /// Base log level (`error`, `warn`, `info`, ...).
    pub log_level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tasks_root: default_tasks_root(),
            plugin_dir: None,
            load_plugins: true,
            load_local_tasks: true,
            naming: NamingPolicy::default(),
            cache_dir: default_cache_dir(),
            debug: false,
            log_level: None,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(root) = non_empty(lookup(ENV_ROOT)) {
            settings.tasks_root = expand_home(&root);
        }
        if let Some(dir) = non_empty(lookup(ENV_PLUGIN_DIR)) {
            settings.plugin_dir = Some(expand_home(&dir));
        }
        if let Some(dir) = non_empty(lookup(ENV_CACHE_DIR)) {
            settings.cache_dir = expand_home(&dir);
        }

        if read_flag(&lookup, ENV_KEEP_PREFIX, false) {
            settings.naming = NamingPolicy::PrefixPreserving;
        }
        settings.load_plugins = read_flag(&lookup, ENV_LOAD_PLUGINS, true);
        settings.load_local_tasks = read_flag(&lookup, ENV_LOCAL_TASKS, true);
        settings.debug = read_flag(&lookup, ENV_DEBUG, false);
        settings.log_level = non_empty(lookup(ENV_LOGLEVEL)).map(|l| l.to_lowercase());

        settings
    }

    /// Returns the effective plugin root.
    pub fn plugin_root(&self) -> PathBuf {
        self.plugin_dir
            .clone()
            .unwrap_or_else(|| self.tasks_root.join(PLUGINS_DIR_NAME))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Parses a boolean toggle.
///
/// Accepts the spellings people actually put in shell profiles, including the
/// Python-style `True`/`False`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn read_flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
            warn!(variable = key, value = %raw, "Unrecognized boolean, treating as false");
            false
        }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(raw).to_path_buf()
}

/// `~/tasks`, where the task repository is conventionally cloned.
fn default_tasks_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("tasks"))
        .unwrap_or_else(|| PathBuf::from("tasks"))
}

/// `<os cache dir>/taskfiles/artifacts`, falling back to the temp dir.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_SUBDIR)
        .join("artifacts")
}
