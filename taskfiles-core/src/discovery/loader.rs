//! Module loader.
//!
//! Parses one task module file into task definitions. A module that fails to
//! read, parse or validate yields a [`ModuleLoadError`] attributed to it and
//! never affects any other module.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace};

use super::types::{
    LoadErrorKind, ModuleDescriptor, ModuleLoadError, TaskDefinition, TaskParam, ToolRequirement,
};

// ============================================================================
// On-disk Format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleFile {
    #[serde(default)]
    module: Option<ModuleHeader>,
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleHeader {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskEntry {
    name: String,
    help: Option<String>,
    run: String,
    workdir: Option<PathBuf>,
    #[serde(default)]
    requires: Vec<RequirementEntry>,
    #[serde(default)]
    params: Vec<ParamEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequirementEntry {
    tool: String,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamEntry {
    name: String,
    help: Option<String>,
    default: Option<toml::Value>,
    #[serde(default)]
    flag: bool,
}

// ============================================================================
// Loading
// ============================================================================

/// Result of loading a single module.
#[derive(Debug)]
pub struct LoadedModule {
    pub descriptor: Arc<ModuleDescriptor>,
    /// `[module] description`, when the module parsed.
    pub description: Option<String>,
    pub outcome: Result<Vec<TaskDefinition>, ModuleLoadError>,
}

/// Loads a module from disk.
pub fn load_module(descriptor: ModuleDescriptor) -> LoadedModule {
    let descriptor = Arc::new(descriptor);
    debug!("Loading module {}", descriptor);

    match fs::read_to_string(&descriptor.location) {
        Ok(source) => parse_module(descriptor, &source),
        Err(e) => LoadedModule {
            outcome: Err(ModuleLoadError::new(
                descriptor.clone(),
                LoadErrorKind::Read(e),
            )),
            descriptor,
            description: None,
        },
    }
}

/// Parses module source that has already been read.
pub fn parse_module(descriptor: Arc<ModuleDescriptor>, source: &str) -> LoadedModule {
    let file: ModuleFile = match toml::from_str(source) {
        Ok(file) => file,
        Err(e) => {
            return LoadedModule {
                outcome: Err(ModuleLoadError::new(
                    descriptor.clone(),
                    LoadErrorKind::Parse(e),
                )),
                descriptor,
                description: None,
            }
        }
    };

    let description = file.module.and_then(|m| m.description);
    let outcome = build_tasks(&descriptor, file.tasks)
        .map_err(|msg| ModuleLoadError::new(descriptor.clone(), LoadErrorKind::Invalid(msg)));

    if let Ok(tasks) = &outcome {
        trace!("Module {} declares {} task(s)", descriptor, tasks.len());
    }

    LoadedModule {
        descriptor,
        description,
        outcome,
    }
}

fn build_tasks(
    descriptor: &Arc<ModuleDescriptor>,
    entries: Vec<TaskEntry>,
) -> Result<Vec<TaskDefinition>, String> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(entries.len());

    for entry in entries {
        if !is_valid_name(&entry.name) {
            return Err(format!("invalid task name `{}`", entry.name));
        }
        let name = normalize_task_name(&entry.name);
        if !seen.insert(name.clone()) {
            return Err(format!("task `{}` is declared more than once", name));
        }

        let params = build_params(&name, entry.params)?;

        for placeholder in placeholders(&entry.run) {
            if !params.iter().any(|p| p.name == placeholder) {
                return Err(format!(
                    "task `{}` references undeclared parameter `{}`",
                    name, placeholder
                ));
            }
        }

        let mut requires = Vec::with_capacity(entry.requires.len());
        for req in entry.requires {
            if req.tool.trim().is_empty() {
                return Err(format!("task `{}` requires a tool with an empty name", name));
            }
            requires.push(ToolRequirement {
                tool: req.tool,
                version: req.version.filter(|v| !v.trim().is_empty()),
            });
        }

        if entry.run.trim().is_empty() {
            return Err(format!("task `{}` has an empty `run` script", name));
        }

        tasks.push(TaskDefinition {
            name,
            module: descriptor.clone(),
            body: entry.run,
            params,
            help: entry.help,
            workdir: entry.workdir,
            requires,
        });
    }

    Ok(tasks)
}

fn build_params(task: &str, entries: Vec<ParamEntry>) -> Result<Vec<TaskParam>, String> {
    let mut seen = HashSet::new();
    let mut params = Vec::with_capacity(entries.len());

    for entry in entries {
        if !is_valid_name(&entry.name) {
            return Err(format!(
                "task `{}` has invalid parameter name `{}`",
                task, entry.name
            ));
        }
        if !seen.insert(entry.name.clone()) {
            return Err(format!(
                "task `{}` declares parameter `{}` more than once",
                task, entry.name
            ));
        }

        let default = match entry.default {
            None => None,
            Some(value) => Some(default_to_string(task, &entry.name, entry.flag, value)?),
        };

        params.push(TaskParam {
            name: entry.name,
            help: entry.help,
            default,
            flag: entry.flag,
        });
    }

    Ok(params)
}

fn default_to_string(task: &str, param: &str, flag: bool, value: toml::Value) -> Result<String, String> {
    use toml::Value;

    let text = match value {
        Value::Boolean(b) => b.to_string(),
        Value::String(s) if flag => {
            if s != "true" && s != "false" {
                return Err(format!(
                    "flag `{}` of task `{}` has non-boolean default `{}`",
                    param, task, s
                ));
            }
            s
        }
        Value::String(s) => s,
        Value::Integer(i) if !flag => i.to_string(),
        Value::Float(f) if !flag => f.to_string(),
        other => {
            return Err(format!(
                "parameter `{}` of task `{}` has unsupported default `{}`",
                param, task, other
            ))
        }
    };
    Ok(text)
}

// ============================================================================
// Helpers
// ============================================================================

/// ASCII alphanumerics, `-` and `_`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `build_image` → `build-image`.
pub fn normalize_task_name(name: &str) -> String {
    name.replace('_', "-")
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_-]+)\s*\}\}").expect("placeholder regex build failed")
    })
}

/// Names referenced as `{{ name }}` in a script, in order of appearance.
pub fn placeholders(script: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(script)
        .map(|c| c[1].to_string())
        .collect()
}

/// Replaces each `{{ name }}` with the value `lookup` returns for it.
///
/// Placeholders without a value are left untouched.
pub fn render_placeholders<F>(script: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder_regex()
        .replace_all(script, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
