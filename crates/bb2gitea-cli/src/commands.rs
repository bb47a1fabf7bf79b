//! CLI command implementations.

use crate::settings::{self, Settings};
use bb2gitea_migrate::{
    BitbucketClient, ConsoleProgressReporter, GiteaClient, MigrationError, MigrationProgress,
    MigrationReport, MigrationRequest, Migrator, MigratorSettings,
};
use console::style;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown configuration key '{0}' (expected one of: {keys})", keys = settings::KNOWN_KEYS.join(", "))]
    UnknownKey(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing configuration value '{0}'")]
    MissingValue(String),

    #[error("Could not determine the user config directory")]
    NoConfigDir,

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("{failed} of {total} repositories failed to migrate")]
    RepositoriesFailed { failed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Persist a configuration key.
pub fn config_set(path: &Path, key: &str, value: &str) -> Result<()> {
    settings::set_value(path, key, value)?;
    println!(
        "{} {key} saved to {}",
        style("✓").green(),
        path.display()
    );
    Ok(())
}

/// Print the effective configuration with secrets masked.
pub fn config_show(path: &Path) -> Result<()> {
    let settings = Settings::load(path)?;
    println!("# {}", path.display());
    print!("{}", serde_yaml::to_string(&settings.masked())?);
    Ok(())
}

/// Migrate one repository or a whole project.
pub async fn migrate(
    settings: &Settings,
    request: MigrationRequest,
    timeout: Option<Duration>,
    reporter: &ConsoleProgressReporter,
) -> Result<()> {
    settings.validate()?;
    let timeout = match timeout {
        Some(timeout) => timeout,
        None => settings.timeout()?,
    };

    let source = BitbucketClient::new(&settings.bitbucket.server, &settings.bitbucket.token)?;
    let target = GiteaClient::new(
        &settings.gitea.server,
        &settings.gitea.token,
        settings.gitea.skip_verify,
    )?;

    // Gitea clones with the Bitbucket credentials.
    let migrator_settings =
        MigratorSettings::new(&settings.bitbucket.username, &settings.bitbucket.token)
            .with_source_id(settings.gitea.source_id)
            .with_timeout(timeout);

    reporter.start();
    let progress = MigrationProgress::with_callback(reporter.callback());
    let migrator = Migrator::new(source, target, migrator_settings).with_progress(progress);

    tracing::info!(
        project = %request.project_key,
        repo = ?request.repo_slug,
        timeout = ?timeout,
        "Running migration"
    );

    let report = match migrator.migrate(&request).await {
        Ok(report) => {
            reporter.finish("done");
            report
        }
        Err(e) => {
            reporter.finish("failed");
            return Err(e.into());
        }
    };

    report.print_summary();
    check_report(&report)?;

    println!(
        "{} Migration of {} finished",
        style("✓").green(),
        request.project_key
    );
    Ok(())
}

fn check_report(report: &MigrationReport) -> Result<()> {
    let failed = report.failed().count();
    if failed > 0 {
        return Err(CliError::RepositoriesFailed {
            failed,
            total: report.repositories.len(),
        });
    }
    Ok(())
}
