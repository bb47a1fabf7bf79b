//! # bb2gitea migration core
//!
//! Migrates Bitbucket Server projects, repositories, users and permissions
//! into Gitea organizations, teams and collaborators.
//!
//! ## Features
//!
//! - **Permission flattening**: user and group grants become one set of
//!   lower-cased usernames per permission level
//! - **Idempotent provisioning**: organizations, users, teams and repositories
//!   are looked up before they are created, so runs can be repeated
//! - **Project mode**: migrate every repository of a project, tolerating
//!   per-repository failures
//! - **Progress Tracking**: phase callbacks with an indicatif console reporter
//!
//! ## Example
//!
//! ```rust,ignore
//! use bb2gitea_migrate::{
//!     BitbucketClient, GiteaClient, MigrationRequest, Migrator, MigratorSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = BitbucketClient::new("https://stash.example.com", "bb_token")?;
//!     let target = GiteaClient::new("https://gitea.example.com", "gitea_token", false)?;
//!     let settings = MigratorSettings::new("migrator", "bb_token").with_source_id(1);
//!
//!     let migrator = Migrator::new(source, target, settings);
//!     let report = migrator
//!         .migrate(&MigrationRequest::repository("PRJ", "api"))
//!         .await?;
//!
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

pub mod bitbucket;
pub mod error;
pub mod gitea;
pub mod orchestrator;
pub mod permission;
pub mod progress;
pub mod source;
pub mod target;
pub mod types;

// Re-export main types
pub use bitbucket::BitbucketClient;
pub use error::{MigrationError, Result};
pub use gitea::GiteaClient;
pub use orchestrator::{Migrator, MigratorSettings, DEFAULT_TIMEOUT};
pub use permission::{flatten, GroupCache, GroupResolver};
pub use progress::{
    ConsoleProgressReporter, MigrationPhase, MigrationProgress, ProgressCallback, ProgressLogWriter,
};
pub use source::SourceClient;
pub use target::{
    AccessMode, MigrateRepoOptions, OrgHandle, RepoHandle, TargetClient, TeamHandle, TeamTemplate,
    UserHandle,
};
pub use types::*;

/// Version of the migration tools.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
