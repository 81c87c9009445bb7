//! Taskfiles Core Library
//!
//! This crate provides the engine behind the `taskf` command. It includes:
//!
//! - Discovery of task modules under a root directory, plugin bundles and a
//!   repository `local_tasks.toml`
//! - Composition of all modules into one registry with collision reporting
//! - Resolution of external tool binaries into a verified on-disk cache
//! - Execution of tasks as shell scripts with their tools on `PATH`
//! - Environment-driven configuration

pub mod artifacts;
pub mod config;
pub mod discovery;
pub mod executor;

// Re-exports for convenience
pub use config::Settings;

// Re-export discovery
pub use discovery::{
    discover, Composition, DiscoveryOptions, DiscoveryReport, ModuleDescriptor, ModuleLoadError,
    ModuleOrigin, NamingCollision, NamingPolicy, TaskDefinition, TaskLookupError, TaskRegistry,
};

// Re-export artifacts
pub use artifacts::{
    ArtifactCache, ArtifactError, ArtifactResolver, ArtifactSpec, CachedArtifact, Catalog,
    Platform, VersionRequest,
};

// Re-export executor
pub use executor::{ArgumentError, TaskArgs, TaskOutcome, TaskRunner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn exports_are_accessible() {
        fn _check_types(
            _settings: &Settings,
            _options: &DiscoveryOptions,
            _composition: &Composition,
            _registry: &TaskRegistry,
            _resolver: &ArtifactResolver,
            _cache: &ArtifactCache,
            _runner: &TaskRunner,
            _outcome: &TaskOutcome,
        ) {
        }
    }

    #[test]
    fn builtin_catalog_is_populated() {
        let catalog = Catalog::builtin();
        for tool in ["kubectl", "kind", "k3d", "helm", "ctlptl"] {
            assert!(catalog.get(tool).is_some(), "missing {}", tool);
        }
    }
}
