//! Core types shared by the discovery pipeline.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

// ============================================================================
// Naming Policy
// ============================================================================

/// Whether module identifiers are kept as a prefix of visible task names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingPolicy {
    /// `docker.build-image`, `local_tasks.create-local-dev-cluster`.
    PrefixPreserving,
    /// `build-image`, `create-local-dev-cluster`.
    #[default]
    Flattened,
}

impl NamingPolicy {
    /// Builds the visible name from namespace segments and a raw task name.
    pub fn visible_name<'a, I>(&self, segments: I, raw: &str) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self {
            Self::Flattened => raw.to_string(),
            Self::PrefixPreserving => {
                let mut name = String::new();
                for segment in segments.into_iter().filter(|s| !s.is_empty()) {
                    name.push_str(segment);
                    name.push('.');
                }
                name.push_str(raw);
                name
            }
        }
    }
}

// ============================================================================
// Module Descriptors
// ============================================================================

/// Where a module was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleOrigin {
    /// The tasks root directory.
    Root,
    /// The repository's `local_tasks.toml`.
    Local,
    /// A plugin bundle.
    Plugin(String),
}

impl ModuleOrigin {
    /// Returns the plugin bundle name, if any.
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            Self::Plugin(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Local => write!(f, "local"),
            Self::Plugin(name) => write!(f, "plugin:{}", name),
        }
    }
}

/// A discovered task module. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleDescriptor {
    /// Dotted path relative to the scan root. Empty for a bundle entry module.
    pub identifier: String,
    /// Absolute location of the module file.
    pub location: PathBuf,
    /// Where the module came from.
    pub origin: ModuleOrigin,
}

impl ModuleDescriptor {
    pub fn new(identifier: impl Into<String>, location: PathBuf, origin: ModuleOrigin) -> Self {
        Self {
            identifier: identifier.into(),
            location,
            origin,
        }
    }

    /// Identifier segments, without empty ones.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.identifier.split('.').filter(|s| !s.is_empty())
    }

    /// Fully-qualified module prefix including the plugin namespace.
    ///
    /// Used to attribute errors to task names under the prefix-preserving policy.
    pub fn qualified_prefix(&self) -> String {
        let namespace = self.origin.plugin_name().unwrap_or_default();
        [namespace, self.identifier.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.identifier.is_empty() {
            "<entry>"
        } else {
            self.identifier.as_str()
        };
        write!(f, "{} [{}] ({})", name, self.origin, self.location.display())
    }
}

// ============================================================================
// Task Definitions
// ============================================================================

/// A declared task parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskParam {
    pub name: String,
    pub help: Option<String>,
    /// A parameter without a default is required.
    pub default: Option<String>,
    /// Boolean switch that takes no value on the command line.
    pub flag: bool,
}

impl TaskParam {
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.flag
    }
}

/// An external tool a task needs on its `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirement {
    pub tool: String,
    /// `None` selects the catalog's default version.
    pub version: Option<String>,
}

/// A task definition as loaded from a module.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    /// Raw local name (already `_` → `-` normalized).
    pub name: String,
    /// The module that declared this task.
    pub module: Arc<ModuleDescriptor>,
    /// Shell script executed with `sh -c`.
    pub body: String,
    pub params: Vec<TaskParam>,
    pub help: Option<String>,
    pub workdir: Option<PathBuf>,
    pub requires: Vec<ToolRequirement>,
}

impl TaskDefinition {
    /// First line of the help text, for listings.
    pub fn summary(&self) -> &str {
        self.help
            .as_deref()
            .and_then(|h| h.lines().next())
            .unwrap_or("")
    }

    pub fn param(&self, name: &str) -> Option<&TaskParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a module could not be loaded.
#[derive(Debug, Error)]
pub enum LoadErrorKind {
    #[error("failed to read module: {0}")]
    Read(#[source] io::Error),

    #[error("invalid TOML: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("plugin bundle rejected: {0}")]
    Bundle(String),
}

/// A module (or bundle) that failed to load. Isolated: other modules still load.
#[derive(Debug, Error)]
#[error("module {module} failed to load: {kind}")]
pub struct ModuleLoadError {
    pub module: Arc<ModuleDescriptor>,
    #[source]
    pub kind: LoadErrorKind,
}

impl ModuleLoadError {
    pub fn new(module: Arc<ModuleDescriptor>, kind: LoadErrorKind) -> Self {
        Self { module, kind }
    }
}

/// Two or more task definitions resolved to the same visible name.
#[derive(Debug, Clone, Error)]
#[error("task name `{name}` is defined by {} modules: {}", origins.len(), format_origins(origins))]
pub struct NamingCollision {
    pub name: String,
    pub origins: Vec<Arc<ModuleDescriptor>>,
}

fn format_origins(origins: &[Arc<ModuleDescriptor>]) -> String {
    origins
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A requested task name could not be dispatched.
#[derive(Debug, Clone, Error)]
pub enum TaskLookupError {
    #[error("task `{name}` not found{}", format_suggestions(suggestions))]
    NotFound {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("task `{}` is ambiguous: {0}", .0.name)]
    Ambiguous(NamingCollision),
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(identifier: &str, origin: ModuleOrigin) -> ModuleDescriptor {
        ModuleDescriptor::new(identifier, PathBuf::from("/tasks/x.toml"), origin)
    }

    #[test]
    fn test_visible_name_policies() {
        let segments = ["k8s", "cluster"];
        assert_eq!(
            NamingPolicy::PrefixPreserving.visible_name(segments, "up"),
            "k8s.cluster.up"
        );
        assert_eq!(NamingPolicy::Flattened.visible_name(segments, "up"), "up");
        assert_eq!(
            NamingPolicy::PrefixPreserving.visible_name(["", "docker"], "build"),
            "docker.build"
        );
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(ModuleOrigin::Root.to_string(), "root");
        assert_eq!(ModuleOrigin::Local.to_string(), "local");
        assert_eq!(
            ModuleOrigin::Plugin("local_tasks".into()).to_string(),
            "plugin:local_tasks"
        );
    }

    #[test]
    fn test_qualified_prefix() {
        let root = descriptor("k8s.cluster", ModuleOrigin::Root);
        assert_eq!(root.qualified_prefix(), "k8s.cluster");

        let entry = descriptor("", ModuleOrigin::Plugin("extra".into()));
        assert_eq!(entry.qualified_prefix(), "extra");

        let nested = descriptor("ops", ModuleOrigin::Plugin("extra".into()));
        assert_eq!(nested.qualified_prefix(), "extra.ops");
        assert_eq!(nested.segments().collect::<Vec<_>>(), vec!["ops"]);
    }

    #[test]
    fn test_lookup_error_messages() {
        let err = TaskLookupError::NotFound {
            name: "build".into(),
            suggestions: vec!["docker.build".into()],
        };
        assert_eq!(
            err.to_string(),
            "task `build` not found (did you mean: docker.build?)"
        );

        let collision = NamingCollision {
            name: "up".into(),
            origins: vec![
                Arc::new(descriptor("a", ModuleOrigin::Root)),
                Arc::new(descriptor("b", ModuleOrigin::Root)),
            ],
        };
        let message = TaskLookupError::Ambiguous(collision).to_string();
        assert!(message.contains("`up` is ambiguous"));
        assert!(message.contains("2 modules"));
    }
}
