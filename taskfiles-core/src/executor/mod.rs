//! Task executor.
//!
//! Runs a selected task: binds arguments to its parameters, resolves the
//! tools it requires and runs its body with `sh -c`.

pub mod args;

use std::ffi::OsString;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::artifacts::{
    bin_dirs, prepend_to_path, ArtifactResolver, ArtifactSpec, CachedArtifact, Platform,
    VersionRequest,
};
use crate::discovery::{render_placeholders, TaskDefinition};

pub use args::{param_env_var, ArgumentError, TaskArgs};

/// Environment variable carrying the visible task name.
pub const ENV_TASK_NAME: &str = "TASKF_TASK";

/// Result of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub exit_code: i32,
    /// Empty unless output was captured.
    pub stdout: String,
    pub stderr: String,
}

impl TaskOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs task definitions as shell scripts.
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    resolver: Option<Arc<ArtifactResolver>>,
    platform: Option<Platform>,
    capture: bool,
    base_path: Option<OsString>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables `requires` resolution through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<ArtifactResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Overrides the detected host platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Captures stdout and stderr instead of inheriting them.
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// PATH the task environment starts from, instead of the process PATH.
    pub fn with_base_path(mut self, path: impl Into<OsString>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Resolves every tool `task` requires, in declaration order.
    pub async fn resolve_requirements(
        &self,
        task: &TaskDefinition,
    ) -> Result<Vec<CachedArtifact>> {
        if task.requires.is_empty() {
            return Ok(Vec::new());
        }
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            anyhow!(
                "task `{}` requires tools but no resolver is configured",
                task.name
            )
        })?;
        let platform = self
            .platform
            .or_else(Platform::detect)
            .ok_or_else(|| anyhow!("unsupported host platform"))?;

        let mut artifacts = Vec::with_capacity(task.requires.len());
        for requirement in &task.requires {
            let version = match &requirement.version {
                Some(v) => VersionRequest::parse(v),
                None => {
                    let tool = resolver
                        .catalog()
                        .get(&requirement.tool)
                        .ok_or_else(|| anyhow!("unknown tool `{}`", requirement.tool))?;
                    VersionRequest::Exact(tool.default_version.clone())
                }
            };
            let spec = ArtifactSpec::new(&requirement.tool, version, platform);
            let artifact = resolver.resolve(&spec).await.with_context(|| {
                format!(
                    "failed to resolve `{}` for task `{}`",
                    requirement.tool, task.name
                )
            })?;
            debug!(tool = %requirement.tool, path = %artifact.path.display(), "Requirement resolved");
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }

    /// Runs `task` under its visible name with command-line `args`.
    pub async fn run(
        &self,
        visible_name: &str,
        task: &TaskDefinition,
        args: &[String],
    ) -> Result<TaskOutcome> {
        let bound = TaskArgs::bind(task, args)?;
        let artifacts = self.resolve_requirements(task).await?;

        let script = render_placeholders(&task.body, |name| bound.get(name).map(str::to_string));

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&script);

        if let Some(dir) = &task.workdir {
            if !dir.is_dir() {
                bail!("working directory does not exist: {}", dir.display());
            }
            cmd.current_dir(dir);
        }

        let path = prepend_to_path(&bin_dirs(&artifacts), self.base_path.as_deref())?;
        cmd.env("PATH", path);
        cmd.env(ENV_TASK_NAME, visible_name);
        for (name, value) in bound.iter() {
            cmd.env(param_env_var(name), value);
        }

        info!(
            task = visible_name,
            module = %task.module,
            tools = artifacts.len(),
            "Running task"
        );

        let outcome = if self.capture {
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            let output = cmd
                .output()
                .await
                .with_context(|| format!("failed to spawn task `{}`", visible_name))?;
            TaskOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
        } else {
            let status = cmd
                .status()
                .await
                .with_context(|| format!("failed to spawn task `{}`", visible_name))?;
            TaskOutcome {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::new(),
                stderr: String::new(),
            }
        };

        debug!(task = visible_name, exit_code = outcome.exit_code, "Task finished");
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::artifacts::resolver::tests::{example_source, example_tool, resolver_with};
    use crate::discovery::{ModuleDescriptor, ModuleOrigin, TaskParam, ToolRequirement};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn task(body: &str) -> TaskDefinition {
        TaskDefinition {
            name: "greet".into(),
            module: Arc::new(ModuleDescriptor::new(
                "demo",
                PathBuf::from("/tasks/demo.toml"),
                ModuleOrigin::Root,
            )),
            body: body.into(),
            params: Vec::new(),
            help: None,
            workdir: None,
            requires: Vec::new(),
        }
    }

    fn runner() -> TaskRunner {
        TaskRunner::new()
            .capture_output(true)
            .with_base_path("/usr/bin:/bin")
    }

    #[tokio::test]
    async fn test_runs_body_and_captures_output() {
        let outcome = runner()
            .run("greet", &task("echo hello; echo oops >&2"), &[])
            .await
            .unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_exit_code_propagates() {
        let outcome = runner().run("greet", &task("exit 7"), &[]).await.unwrap();
        assert_eq!(outcome.exit_code, 7);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_params_render_and_export() {
        let mut t = task("echo {{ who }} $TASKF_PARAM_WHO $TASKF_PARAM_LOUD $TASKF_TASK");
        t.params = vec![
            TaskParam {
                name: "who".into(),
                help: None,
                default: None,
                flag: false,
            },
            TaskParam {
                name: "loud".into(),
                help: None,
                default: None,
                flag: true,
            },
        ];
        let outcome = runner()
            .run("demo-greet", &t, &["world".to_string(), "--loud".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "world world true demo-greet\n");
    }

    #[tokio::test]
    async fn test_argument_errors_surface() {
        let err = runner()
            .run("greet", &task("true"), &["--nope".to_string()])
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ArgumentError>(),
            Some(&ArgumentError::UnknownOption("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_workdir() {
        let dir = TempDir::new().unwrap();
        let mut t = task("pwd");
        t.workdir = Some(dir.path().to_path_buf());
        let outcome = runner().run("greet", &t, &[]).await.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(outcome.stdout.trim()).canonicalize().unwrap(), expected);

        t.workdir = Some(dir.path().join("missing"));
        assert!(runner().run("greet", &t, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_requirements_are_on_path() {
        let cache = TempDir::new().unwrap();
        let source = Arc::new(example_source(b"#!/bin/sh\necho from example-tool\n"));
        let resolver = resolver_with(cache.path(), vec![example_tool()], source.clone());

        let mut t = task("example-tool");
        t.requires = vec![ToolRequirement {
            tool: "example-tool".into(),
            version: Some("v1.2.3".into()),
        }];

        let runner = runner()
            .with_resolver(Arc::new(resolver))
            .with_platform(Platform::parse("linux/amd64").unwrap());
        let outcome = runner.run("greet", &t, &[]).await.unwrap();
        assert_eq!(outcome.stdout, "from example-tool\n");

        runner.run("greet", &t, &[]).await.unwrap();
        assert_eq!(source.downloads(), 1);
    }

    #[tokio::test]
    async fn test_requirements_without_resolver_fail() {
        let mut t = task("true");
        t.requires = vec![ToolRequirement {
            tool: "kind".into(),
            version: None,
        }];
        assert!(runner().run("greet", &t, &[]).await.is_err());
    }
}
