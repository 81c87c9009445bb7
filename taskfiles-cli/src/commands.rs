//! Subcommand implementations.
//!
//! Each command returns the process exit code.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use taskfiles_core::artifacts::{ChecksumSource, VerificationState};
use taskfiles_core::{
    discover, ArtifactCache, ArtifactResolver, ArtifactSpec, Catalog, Composition,
    DiscoveryOptions, DiscoveryReport, NamingPolicy, Platform, Settings, TaskLookupError,
    TaskRunner, VersionRequest,
};

fn compose(settings: &Settings) -> Result<Composition> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let options = DiscoveryOptions::from_settings(settings, &cwd);
    debug!(?options, "Discovery options");
    Ok(discover(&options))
}

fn resolver(settings: &Settings) -> Result<ArtifactResolver> {
    let cache = ArtifactCache::new(&settings.cache_dir);
    Ok(ArtifactResolver::http(cache)?)
}

fn print_report(report: &DiscoveryReport) {
    if report.is_empty() {
        return;
    }
    eprintln!();
    for error in &report.load_errors {
        eprintln!("warning: {}", error);
    }
    for collision in &report.collisions {
        eprintln!("warning: {}", collision);
    }
}

/// Hints printed after an unknown task name.
///
/// Flattened names carry no module prefix, so failed modules cannot be matched
/// to the name and are only counted.
fn not_found_notes(report: &DiscoveryReport, naming: NamingPolicy, name: &str) -> Vec<String> {
    match naming {
        NamingPolicy::PrefixPreserving => report
            .errors_for(name)
            .map(|error| error.to_string())
            .collect(),
        NamingPolicy::Flattened if report.load_errors.is_empty() => Vec::new(),
        NamingPolicy::Flattened => vec![format!(
            "{} module(s) failed to load; run `taskf list` to see them",
            report.load_errors.len()
        )],
    }
}

/// `taskf list`
pub fn list(settings: &Settings) -> Result<i32> {
    let composition = compose(settings)?;

    if composition.registry.is_empty() {
        println!("No tasks found under {}", settings.tasks_root.display());
    } else {
        let width = composition
            .registry
            .names()
            .map(str::len)
            .max()
            .unwrap_or(0);
        for (name, task) in composition.registry.iter() {
            println!("{:<width$}  {}", name, task.summary(), width = width);
        }
    }

    print_report(&composition.report);
    Ok(0)
}

/// `taskf run <task> [args...]`
pub async fn run_task(settings: &Settings, name: &str, args: &[String]) -> Result<i32> {
    let composition = compose(settings)?;

    let task = match composition.lookup(name) {
        Ok(task) => task,
        Err(e) => {
            eprintln!("error: {}", e);
            if let TaskLookupError::NotFound { .. } = e {
                for note in not_found_notes(&composition.report, settings.naming, name) {
                    eprintln!("note: {}", note);
                }
            }
            return Ok(1);
        }
    };

    let mut runner = TaskRunner::new();
    if !task.requires.is_empty() {
        runner = runner.with_resolver(Arc::new(resolver(settings)?));
    }

    let outcome = runner.run(name, task, args).await?;
    Ok(outcome.exit_code)
}

/// `taskf fetch <tool>`
pub async fn fetch(
    settings: &Settings,
    tool: &str,
    version: Option<&str>,
    platform: Option<&str>,
    sha256: Option<String>,
) -> Result<i32> {
    let resolver = resolver(settings)?;

    let platform = match platform {
        Some(raw) => Platform::parse(raw)
            .ok_or_else(|| anyhow!("invalid platform `{}` (expected os/arch)", raw))?,
        None => Platform::detect().ok_or_else(|| anyhow!("unsupported host platform"))?,
    };
    let version = match version {
        Some(v) => VersionRequest::parse(v),
        None => {
            let definition = resolver
                .catalog()
                .get(tool)
                .ok_or_else(|| anyhow!("unknown tool `{}`", tool))?;
            VersionRequest::Exact(definition.default_version.clone())
        }
    };

    let mut spec = ArtifactSpec::new(tool, version, platform);
    if let Some(hash) = sha256 {
        spec = spec.with_checksum(ChecksumSource::Sha256(hash));
    }

    let artifact = resolver.resolve(&spec).await?;
    println!("{}", artifact.path.display());
    Ok(0)
}

/// `taskf tools`
pub fn tools() -> Result<i32> {
    let catalog = Catalog::builtin();
    let width = catalog.iter().map(|t| t.id.len()).max().unwrap_or(0);
    for tool in catalog.iter() {
        println!(
            "{:<width$}  {:<10}  {}",
            tool.id,
            tool.default_version,
            tool.description,
            width = width
        );
    }
    Ok(0)
}

/// `taskf cache list`
pub async fn cache_list(settings: &Settings, verify: bool) -> Result<i32> {
    let cache = ArtifactCache::new(&settings.cache_dir);
    let listings = cache.list(verify).await?;

    if listings.is_empty() {
        println!("Cache at {} is empty", cache.root().display());
        return Ok(0);
    }

    let mut failed = false;
    for listing in &listings {
        let record = &listing.record;
        println!(
            "{} {} {} {} {}",
            record.tool,
            record.version,
            record.platform,
            listing.state,
            listing.path.display()
        );
        failed |= listing.state == VerificationState::Failed;
    }
    Ok(if failed { 1 } else { 0 })
}

/// `taskf cache remove <tool>`
pub async fn cache_remove(settings: &Settings, tool: &str) -> Result<i32> {
    let cache = ArtifactCache::new(&settings.cache_dir);
    let removed = cache.remove_tool(tool).await?;
    println!("Removed {} cached entr{} of {}", removed, plural(removed), tool);
    Ok(0)
}

/// `taskf cache purge`
pub async fn cache_purge(settings: &Settings) -> Result<i32> {
    let cache = ArtifactCache::new(&settings.cache_dir);
    let removed = cache.purge().await?;
    println!("Removed {} cached entr{}", removed, plural(removed));
    Ok(0)
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}
