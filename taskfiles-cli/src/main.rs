//! taskf - run tasks from composable task modules
//!
//! Discovers task modules under the tasks root, plugin bundles and the
//! repository's `local_tasks.toml`, and runs the selected task. Tools a task
//! requires are fetched into a verified cache first.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskfiles_core::{NamingPolicy, Settings};

mod commands;

/// taskf - composable task runner
#[derive(Parser)]
#[command(name = "taskf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tasks root directory (overrides TASKS_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Keep module names as prefixes of task names
    #[arg(long, global = true)]
    keep_prefix: bool,

    /// Do not load plugin bundles
    #[arg(long, global = true)]
    no_plugins: bool,

    /// Trace discovery and resolution
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all tasks
    List,

    /// Run a task
    Run {
        /// Task name
        task: String,

        /// Task arguments (`--param value`, `--flag` or positionals)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Fetch a tool into the cache and print its path
    Fetch {
        /// Tool identifier (see `taskf tools`)
        tool: String,

        /// Version, or `latest` (default: the catalog default)
        #[arg(long)]
        version: Option<String>,

        /// Target platform as os/arch (default: this host)
        #[arg(long)]
        platform: Option<String>,

        /// Expected sha256 of the download
        #[arg(long)]
        sha256: Option<String>,
    },

    /// List known tools
    Tools,

    /// Manage the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached artifacts
    List {
        /// Re-hash every cached executable
        #[arg(long)]
        verify: bool,
    },
    /// Remove every cached version of a tool
    Remove {
        /// Tool identifier
        tool: String,
    },
    /// Remove everything from the cache
    Purge,
}

impl Cli {
    /// Applies command-line overrides on top of environment settings.
    fn settings(&self) -> Settings {
        let mut settings = Settings::from_env();
        if let Some(root) = &self.root {
            settings.tasks_root = root.clone();
        }
        if self.keep_prefix {
            settings.naming = NamingPolicy::PrefixPreserving;
        }
        if self.no_plugins {
            settings.load_plugins = false;
        }
        if self.debug {
            settings.debug = true;
        }
        settings
    }
}

/// Logs go to stderr so task output stays clean.
fn init_logging(settings: &Settings) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let base = settings.log_level.as_deref().unwrap_or("warn");
            if settings.debug {
                EnvFilter::new(format!("{},taskfiles_core=trace,taskf=debug", base))
            } else {
                EnvFilter::new(base)
            }
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(settings.debug)
        .init();
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = cli.settings();
    init_logging(&settings);

    tracing::debug!("taskf v{}", taskfiles_core::VERSION);

    match run(cli.command, settings).await {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, settings: Settings) -> Result<i32> {
    match command {
        Commands::List => commands::list(&settings),
        Commands::Run { task, args } => commands::run_task(&settings, &task, &args).await,
        Commands::Fetch {
            tool,
            version,
            platform,
            sha256,
        } => {
            commands::fetch(
                &settings,
                &tool,
                version.as_deref(),
                platform.as_deref(),
                sha256,
            )
            .await
        }
        Commands::Tools => commands::tools(),
        Commands::Cache { command } => match command {
            CacheCommands::List { verify } => commands::cache_list(&settings, verify).await,
            CacheCommands::Remove { tool } => commands::cache_remove(&settings, &tool).await,
            CacheCommands::Purge => commands::cache_purge(&settings).await,
        },
    }
}
