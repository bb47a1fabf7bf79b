//! bb2gitea - migrate Bitbucket Server projects to Gitea.

use anyhow::Context;
use bb2gitea_migrate::{ConsoleProgressReporter, MigrationRequest};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod settings;

use settings::Settings;

/// Migrate Bitbucket Server projects, repositories and permissions to Gitea
#[derive(Parser, Debug)]
#[command(name = "bb2gitea")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $CONFIG_DIR/bitbucketServer2Gitea/.config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Migrate a single repository
    Repo {
        /// Bitbucket project key
        #[arg(long)]
        project_key: String,
        /// Bitbucket repository slug
        #[arg(long)]
        repo_slug: String,
        /// Gitea organization (default: the project name)
        #[arg(long)]
        target_owner: Option<String>,
        /// Gitea repository name (default: the source repository name)
        #[arg(long)]
        target_repo: Option<String>,
    },

    /// Migrate a project, or one of its repositories
    Migrate {
        /// Bitbucket project key
        #[arg(long)]
        project_key: String,
        /// Bitbucket repository slug; omit to migrate the whole project
        #[arg(long)]
        repo_slug: Option<String>,
        /// Gitea organization (default: the project name)
        #[arg(long)]
        target_owner: Option<String>,
        /// Gitea repository name, honored when one repository is migrated
        #[arg(long)]
        target_repo: Option<String>,
        /// Overall timeout, e.g. 30s, 10m, 1h30m
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Persist a configuration value
    Set {
        /// Configuration key, e.g. gitea.server
        key: String,
        /// Value to store
        value: String,
    },

    /// Show the effective configuration
    Show,
}

fn main() {
    let cli = Cli::parse();

    // Log lines go through the progress bar so they do not tear the spinner.
    let reporter = ConsoleProgressReporter::new();
    let log_writer = reporter.log_writer();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("bb2gitea={log_level},bb2gitea_migrate={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(move || log_writer.clone()))
        .init();

    if let Err(e) = run(cli, &reporter) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, reporter: &ConsoleProgressReporter) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => settings::default_config_path()?,
    };

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => commands::config_set(&config_path, &key, &value)?,
            ConfigCommands::Show => commands::config_show(&config_path)?,
        },
        Commands::Repo {
            project_key,
            repo_slug,
            target_owner,
            target_repo,
        } => {
            let request = build_request(project_key, Some(repo_slug), target_owner, target_repo);
            migrate(&config_path, request, None, reporter)?;
        }
        Commands::Migrate {
            project_key,
            repo_slug,
            target_owner,
            target_repo,
            timeout,
        } => {
            let request = build_request(project_key, repo_slug, target_owner, target_repo);
            migrate(&config_path, request, timeout.as_deref(), reporter)?;
        }
        Commands::Version => {
            println!("bb2gitea {}", bb2gitea_migrate::VERSION);
        }
    }

    Ok(())
}

fn build_request(
    project_key: String,
    repo_slug: Option<String>,
    target_owner: Option<String>,
    target_repo: Option<String>,
) -> MigrationRequest {
    let mut request = match repo_slug {
        Some(slug) => MigrationRequest::repository(project_key, slug),
        None => MigrationRequest::project(project_key),
    };
    if let Some(owner) = target_owner {
        request = request.with_target_owner(owner);
    }
    if let Some(name) = target_repo {
        request = request.with_target_repo(name);
    }
    request
}

fn migrate(
    config_path: &std::path::Path,
    request: MigrationRequest,
    timeout: Option<&str>,
    reporter: &ConsoleProgressReporter,
) -> anyhow::Result<()> {
    let settings = Settings::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let timeout = timeout.map(settings::parse_duration).transpose()?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(commands::migrate(&settings, request, timeout, reporter))?;
    Ok(())
}
