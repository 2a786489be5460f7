use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use plugin_registry::config::{RegistryConfig, log_path};
use plugin_registry::store::SqliteStore;
use plugin_registry::sync::{BatchReport, SyncCoordinator, SyncOptions, SyncReport};
use plugin_registry::vcs::VcsRouter;
use plugin_registry::version::Stability;

#[derive(Parser)]
#[command(name = "plugin-registry")]
#[command(version, about = "Composer-style package registry with plugin compatibility tracking")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results and write logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a package
    Register {
        name: String,
        #[arg(long = "type", default_value = "library")]
        package_type: String,
        #[arg(long)]
        repository: Option<String>,
        /// Always sync every tag and create a push webhook
        #[arg(long)]
        managed: bool,
    },
    /// Remove a package with all its releases
    Remove { name: String },
    /// Sync one package and the dependencies it pulls in
    Sync {
        name: String,
        /// Re-populate releases whose tag did not move
        #[arg(long)]
        force: bool,
        /// Limit the sync to one version
        #[arg(long)]
        only_version: Option<String>,
    },
    /// Sync every managed package
    SyncManaged {
        #[arg(long)]
        force: bool,
    },
    /// Sync every unmanaged package
    SyncDependencies {
        #[arg(long)]
        force: bool,
    },
    /// Re-extract release notes from a release's changelog
    Changelog { name: String, version: Option<String> },
    /// Latest release at or above a stability
    Latest {
        name: String,
        #[arg(long, default_value = "stable")]
        stability: Stability,
        #[arg(long)]
        constraint: Option<String>,
    },
    /// Host releases a plugin release works with
    Compatible { plugin: String, version: String },
    /// Rebuild a plugin's compatibility index
    Reindex { name: String },
}

fn init_logging(json: bool) -> anyhow::Result<WorkerGuard> {
    let path = log_path();
    let dir = path.parent().context("log path has no parent directory")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_name = path.file_name().context("log path has no file name")?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(guard)
}

fn print_report(name: &str, report: &SyncReport, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(&json!({ "package": name, "report": report }))?);
    } else {
        println!(
            "{}: {} added, {} updated, {} deleted, {} invalid, {} compatibility entries",
            name, report.added, report.updated, report.deleted, report.invalid, report.compat_entries
        );
    }
    Ok(())
}

fn print_batch(batch: &BatchReport, as_json: bool) -> anyhow::Result<()> {
    for (name, report) in &batch.synced {
        print_report(name, report, as_json)?;
    }
    for (name, error) in &batch.errors {
        if as_json {
            println!("{}", json!({ "package": name, "error": error.to_string() }));
        } else {
            eprintln!("{}: {}", name, error);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.json)?;

    let config = RegistryConfig::load(cli.config.as_deref())?;
    let database = config.database_path();
    if let Some(dir) = database.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = Arc::new(SqliteStore::open(&database)?);
    let vcs = Arc::new(VcsRouter::from_config(&config));
    let coordinator = SyncCoordinator::new(store, vcs, config);

    match cli.command {
        Command::Register {
            name,
            package_type,
            repository,
            managed,
        } => {
            let package = coordinator
                .register_package(&name, &package_type, repository.as_deref(), managed)
                .await?;
            println!("Registered {} ({})", package.name, package.package_type);
        }
        Command::Remove { name } => {
            coordinator.remove_package(&name).await?;
            println!("Removed {}", name);
        }
        Command::Sync {
            name,
            force,
            only_version,
        } => {
            let options = SyncOptions { force, only_version };
            let report = coordinator.sync_package(&name, &options).await?;
            print_report(&name, &report, cli.json)?;
        }
        Command::SyncManaged { force } => {
            let batch = coordinator.sync_all_managed(force).await?;
            print_batch(&batch, cli.json)?;
            if !batch.is_clean() {
                anyhow::bail!("{} packages failed to sync", batch.errors.len());
            }
        }
        Command::SyncDependencies { force } => {
            let batch = coordinator.sync_all_dependencies(force).await?;
            print_batch(&batch, cli.json)?;
            if !batch.is_clean() {
                anyhow::bail!("{} packages failed to sync", batch.errors.len());
            }
        }
        Command::Changelog { name, version } => {
            let updated = coordinator.extract_changelog(&name, version.as_deref()).await?;
            println!("Updated notes of {} releases", updated);
        }
        Command::Latest {
            name,
            stability,
            constraint,
        } => match coordinator.latest_release(&name, stability, constraint.as_deref())? {
            Some(release) if cli.json => println!(
                "{}",
                json!({
                    "version": release.version,
                    "normalizedVersion": release.normalized_version,
                    "stability": release.stability.as_str(),
                })
            ),
            Some(release) => println!("{}", release.version),
            None => anyhow::bail!("No release of {} matches", name),
        },
        Command::Compatible { plugin, version } => {
            let hosts = coordinator.compatible_host_releases(&plugin, &version)?;
            let versions: Vec<&str> = hosts.iter().map(|r| r.version.as_str()).collect();
            if cli.json {
                println!("{}", json!(versions));
            } else {
                for version in versions {
                    println!("{}", version);
                }
            }
        }
        Command::Reindex { name } => {
            let count = coordinator.reindex_compatibility(&name).await?;
            println!("Indexed {} compatibility entries", count);
        }
    }

    Ok(())
}
