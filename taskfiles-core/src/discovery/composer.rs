//! Namespace composer.
//!
//! Merges loaded modules into a single [`TaskRegistry`]. A name contributed by
//! more than one module becomes a [`NamingCollision`] and is removed from the
//! registry; every later contributor joins the same collision.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::loader::LoadedModule;
use super::types::{
    ModuleDescriptor, ModuleLoadError, NamingCollision, NamingPolicy, TaskDefinition,
    TaskLookupError,
};

// ============================================================================
// Registry
// ============================================================================

/// Fully-qualified task name → definition, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskDefinition>,
}

impl TaskRegistry {
    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskDefinition)> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl IntoIterator for TaskRegistry {
    type Item = (String, TaskDefinition);
    type IntoIter = btree_map::IntoIter<String, TaskDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

// ============================================================================
// Report
// ============================================================================

/// Everything that went wrong during discovery, alongside a usable registry.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub load_errors: Vec<ModuleLoadError>,
    pub collisions: Vec<NamingCollision>,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.load_errors.is_empty() && self.collisions.is_empty()
    }

    pub fn collision(&self, name: &str) -> Option<&NamingCollision> {
        self.collisions.iter().find(|c| c.name == name)
    }

    /// Load errors of modules whose qualified prefix is a prefix of `name`.
    pub fn errors_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ModuleLoadError> {
        self.load_errors.iter().filter(move |e| {
            let prefix = e.module.qualified_prefix();
            !prefix.is_empty()
                && (name == prefix
                    || name
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('.')))
        })
    }
}

/// A task registry together with its discovery report. Always produced.
#[derive(Debug, Default)]
pub struct Composition {
    pub registry: TaskRegistry,
    pub report: DiscoveryReport,
}

impl Composition {
    /// Looks up a callable task.
    pub fn lookup(&self, name: &str) -> Result<&TaskDefinition, TaskLookupError> {
        if let Some(collision) = self.report.collision(name) {
            return Err(TaskLookupError::Ambiguous(collision.clone()));
        }
        self.registry
            .get(name)
            .ok_or_else(|| TaskLookupError::NotFound {
                name: name.to_string(),
                suggestions: self.suggestions(name),
            })
    }

    /// Registered names whose last segment matches the last segment of `name`.
    pub fn suggestions(&self, name: &str) -> Vec<String> {
        let wanted = last_segment(name);
        self.registry
            .names()
            .filter(|candidate| *candidate != name && last_segment(candidate) == wanted)
            .map(str::to_string)
            .collect()
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

// ============================================================================
// Composer
// ============================================================================

/// Incrementally builds a [`Composition`].
#[derive(Debug)]
pub struct Composer {
    policy: NamingPolicy,
    tasks: BTreeMap<String, TaskDefinition>,
    collisions: BTreeMap<String, Vec<Arc<ModuleDescriptor>>>,
    load_errors: Vec<ModuleLoadError>,
}

impl Composer {
    pub fn new(policy: NamingPolicy) -> Self {
        Self {
            policy,
            tasks: BTreeMap::new(),
            collisions: BTreeMap::new(),
            load_errors: Vec::new(),
        }
    }

    pub fn policy(&self) -> NamingPolicy {
        self.policy
    }

    /// Adds a loaded module: its tasks, or its load error.
    pub fn add_module(&mut self, loaded: LoadedModule) {
        match loaded.outcome {
            Ok(tasks) => {
                debug!(
                    "Composing {} task(s) from {}",
                    tasks.len(),
                    loaded.descriptor
                );
                for task in tasks {
                    let visible = self.policy.visible_name(task.module.segments(), &task.name);
                    self.insert(visible, task);
                }
            }
            Err(e) => self.add_error(e),
        }
    }

    pub fn add_error(&mut self, error: ModuleLoadError) {
        warn!("{}", error);
        self.load_errors.push(error);
    }

    /// Merges a child composition (a plugin bundle) under `namespace`.
    ///
    /// The namespace is applied only under the prefix-preserving policy. The
    /// collision rule applies across parent and child names.
    pub fn absorb(&mut self, namespace: &str, child: Composition) {
        let Composition { registry, report } = child;

        for (name, task) in registry {
            let visible = self.policy.visible_name([namespace], &name);
            self.insert(visible, task);
        }

        for collision in report.collisions {
            let visible = self.policy.visible_name([namespace], &collision.name);
            for origin in collision.origins {
                self.insert_origin(&visible, origin);
            }
        }

        for error in report.load_errors {
            self.load_errors.push(error);
        }
    }

    fn insert(&mut self, name: String, task: TaskDefinition) {
        if let Some(origins) = self.collisions.get_mut(&name) {
            warn!("Task `{}` from {} joins an existing collision", name, task.module);
            origins.push(task.module);
            return;
        }

        match self.tasks.remove(&name) {
            Some(existing) => {
                warn!(
                    "Task name `{}` defined by both {} and {}",
                    name, existing.module, task.module
                );
                self.collisions
                    .insert(name, vec![existing.module, task.module]);
            }
            None => {
                self.tasks.insert(name, task);
            }
        }
    }

    /// Records an origin that is already known to collide.
    fn insert_origin(&mut self, name: &str, origin: Arc<ModuleDescriptor>) {
        if let Some(existing) = self.tasks.remove(name) {
            self.collisions
                .entry(name.to_string())
                .or_default()
                .push(existing.module);
        }
        self.collisions
            .entry(name.to_string())
            .or_default()
            .push(origin);
    }

    pub fn finish(self) -> Composition {
        let collisions = self
            .collisions
            .into_iter()
            .map(|(name, origins)| NamingCollision { name, origins })
            .collect();

        Composition {
            registry: TaskRegistry { tasks: self.tasks },
            report: DiscoveryReport {
                load_errors: self.load_errors,
                collisions,
            },
        }
    }
}

/// Composes a set of loaded modules in one step.
pub fn compose<I>(policy: NamingPolicy, modules: I) -> Composition
where
    I: IntoIterator<Item = LoadedModule>,
{
    let mut composer = Composer::new(policy);
    for module in modules {
        composer.add_module(module);
    }
    composer.finish()
}
