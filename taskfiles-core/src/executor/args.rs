//! Binding command-line arguments to task parameters.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::parse_flag;
use crate::discovery::loader::normalize_task_name;
use crate::discovery::{TaskDefinition, TaskParam};

/// Why arguments could not be bound to a task's parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("unknown option `--{0}`")]
    UnknownOption(String),

    #[error("option `--{0}` needs a value")]
    MissingValue(String),

    #[error("`{value}` is not a boolean for `--{name}`")]
    InvalidFlag { name: String, value: String },

    #[error("missing required parameter `{0}`")]
    MissingRequired(String),

    #[error("unexpected argument `{0}`")]
    TooManyPositionals(String),
}

/// Parameter values bound for one task invocation.
///
/// Every declared parameter has a value: flags are `"true"` or `"false"`,
/// optional parameters fall back to their default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskArgs {
    values: BTreeMap<String, String>,
}

impl TaskArgs {
    /// Binds `args` to the parameters of `task`.
    ///
    /// Accepts `--name value`, `--name=value`, `--flag` and positionals, which
    /// fill required parameters in declaration order. Everything after `--` is
    /// positional. `_` and `-` are interchangeable in option names.
    pub fn bind(task: &TaskDefinition, args: &[String]) -> Result<Self, ArgumentError> {
        let mut values: BTreeMap<String, String> = BTreeMap::new();
        let mut positionals: Vec<&str> = Vec::new();
        let mut iter = args.iter();
        let mut options_done = false;

        while let Some(arg) = iter.next() {
            if options_done || !arg.starts_with("--") || arg.len() == 2 {
                if arg == "--" && !options_done {
                    options_done = true;
                } else {
                    positionals.push(arg);
                }
                continue;
            }

            let (name, inline) = match arg[2..].split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (&arg[2..], None),
            };
            let param = find_param(task, name)
                .ok_or_else(|| ArgumentError::UnknownOption(name.to_string()))?;

            let value = if param.flag {
                match inline {
                    None => "true".to_string(),
                    Some(raw) => match parse_flag(raw) {
                        Some(b) => b.to_string(),
                        None => {
                            return Err(ArgumentError::InvalidFlag {
                                name: name.to_string(),
                                value: raw.to_string(),
                            })
                        }
                    },
                }
            } else {
                match inline {
                    Some(value) => value.to_string(),
                    None => iter
                        .next()
                        .cloned()
                        .ok_or_else(|| ArgumentError::MissingValue(name.to_string()))?,
                }
            };
            values.insert(param.name.clone(), value);
        }

        let mut positionals = positionals.into_iter();
        for param in task.params.iter().filter(|p| p.is_required()) {
            if values.contains_key(&param.name) {
                continue;
            }
            match positionals.next() {
                Some(value) => {
                    values.insert(param.name.clone(), value.to_string());
                }
                None => return Err(ArgumentError::MissingRequired(param.name.clone())),
            }
        }
        if let Some(extra) = positionals.next() {
            return Err(ArgumentError::TooManyPositionals(extra.to_string()));
        }

        for param in &task.params {
            if values.contains_key(&param.name) {
                continue;
            }
            let fallback = match (&param.default, param.flag) {
                (Some(default), _) => default.clone(),
                (None, true) => "false".to_string(),
                (None, false) => continue,
            };
            values.insert(param.name.clone(), fallback);
        }

        Ok(Self { values })
    }

    /// Value of a parameter, matching `_` and `-` interchangeably.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str).or_else(|| {
            let wanted = normalize_task_name(name);
            self.values
                .iter()
                .find(|(k, _)| normalize_task_name(k) == wanted)
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn find_param<'a>(task: &'a TaskDefinition, name: &str) -> Option<&'a TaskParam> {
    let wanted = normalize_task_name(name);
    task.params
        .iter()
        .find(|p| normalize_task_name(&p.name) == wanted)
}

/// Environment variable carrying a parameter: `TASKF_PARAM_<NAME>`.
pub fn param_env_var(name: &str) -> String {
    format!("TASKF_PARAM_{}", name.to_ascii_uppercase().replace('-', "_"))
}
