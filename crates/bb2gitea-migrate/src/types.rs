//! Common types for migration operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A Bitbucket Server permission level, at project or repository scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    ProjectAdmin,
    ProjectWrite,
    ProjectRead,
    RepoCreate,
    RepoAdmin,
    RepoWrite,
    RepoRead,
}

impl PermissionLevel {
    /// Wire name as used by the Bitbucket REST API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectAdmin => "PROJECT_ADMIN",
            Self::ProjectWrite => "PROJECT_WRITE",
            Self::ProjectRead => "PROJECT_READ",
            Self::RepoCreate => "REPO_CREATE",
            Self::RepoAdmin => "REPO_ADMIN",
            Self::RepoWrite => "REPO_WRITE",
            Self::RepoRead => "REPO_READ",
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source project snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub key: String,
    pub name: String,
    pub description: String,
    pub is_public: bool,
}

/// A named clone link of a source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneLink {
    /// Protocol name as declared by the source, e.g. `http` or `ssh`.
    pub name: String,
    pub href: String,
}

/// Source repository snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub is_public: bool,
    pub clone_links: Vec<CloneLink>,
}

impl RepositoryInfo {
    /// Returns the clone URL of the link tagged `http`, if any.
    ///
    /// Link ordering varies between Bitbucket versions, so the link is
    /// selected by name and never by position.
    pub fn http_clone_url(&self) -> Option<&str> {
        self.clone_links
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case("http"))
            .map(|l| l.href.as_str())
    }
}

/// A user as known to the source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub username: String,
    pub display_name: String,
    pub email: String,
}

impl UserIdentity {
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            email: email.into(),
        }
    }

    /// Lower-cased username used for every comparison against the target.
    pub fn normalized(&self) -> String {
        self.username.to_lowercase()
    }
}

/// Who a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantSubject {
    User(UserIdentity),
    Group(String),
}

/// One permission grant emitted by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub subject: GrantSubject,
    pub level: PermissionLevel,
}

impl PermissionGrant {
    pub fn user(identity: UserIdentity, level: PermissionLevel) -> Self {
        Self {
            subject: GrantSubject::User(identity),
            level,
        }
    }

    pub fn group(name: impl Into<String>, level: PermissionLevel) -> Self {
        Self {
            subject: GrantSubject::Group(name.into()),
            level,
        }
    }
}

/// Where permissions are read from on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionScope {
    Project(String),
    Repository { project_key: String, slug: String },
}

impl PermissionScope {
    pub fn repository(project_key: impl Into<String>, slug: impl Into<String>) -> Self {
        Self::Repository {
            project_key: project_key.into(),
            slug: slug.into(),
        }
    }
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(key) => write!(f, "project {key}"),
            Self::Repository { project_key, slug } => write!(f, "repository {project_key}/{slug}"),
        }
    }
}

/// Permission level to the set of normalized usernames holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedPermissionMap {
    levels: BTreeMap<PermissionLevel, BTreeSet<String>>,
}

impl FlattenedPermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a username under a level. Returns false if it was already there.
    pub fn insert(&mut self, level: PermissionLevel, username: &str) -> bool {
        self.levels
            .entry(level)
            .or_default()
            .insert(username.to_lowercase())
    }

    pub fn users(&self, level: PermissionLevel) -> Option<&BTreeSet<String>> {
        self.levels.get(&level)
    }

    pub fn contains(&self, level: PermissionLevel, username: &str) -> bool {
        self.levels
            .get(&level)
            .is_some_and(|users| users.contains(&username.to_lowercase()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PermissionLevel, &BTreeSet<String>)> {
        self.levels.iter().map(|(level, users)| (*level, users))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of (level, user) pairs.
    pub fn grant_count(&self) -> usize {
        self.levels.values().map(BTreeSet::len).sum()
    }
}

/// Flattened permissions plus the identity of every user discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPermissions {
    pub map: FlattenedPermissionMap,
    /// Keyed by normalized username.
    pub users: BTreeMap<String, UserIdentity>,
}

/// What to migrate and where to put it.
#[derive(Debug, Clone, Default)]
pub struct MigrationRequest {
    /// Source project key.
    pub project_key: String,

    /// Source repository slug. `None` migrates every repository of the project.
    pub repo_slug: Option<String>,

    /// Target organization (defaults to the source project name).
    pub target_owner: Option<String>,

    /// Target repository name (defaults to the source repository name).
    pub target_repo: Option<String>,
}

impl MigrationRequest {
    /// Migrate one repository.
    pub fn repository(project_key: impl Into<String>, repo_slug: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            repo_slug: Some(repo_slug.into()),
            ..Default::default()
        }
    }

    /// Migrate every repository of a project.
    pub fn project(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            ..Default::default()
        }
    }

    /// Set the target organization.
    pub fn with_target_owner(mut self, owner: impl Into<String>) -> Self {
        self.target_owner = Some(owner.into());
        self
    }

    /// Set the target repository name.
    pub fn with_target_repo(mut self, name: impl Into<String>) -> Self {
        self.target_repo = Some(name.into());
        self
    }

    pub fn is_project_mode(&self) -> bool {
        self.repo_slug.is_none()
    }
}

/// Final state of one repository in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum RepositoryStatus {
    /// Imported during this run.
    Migrated,
    /// Already present on the target; permissions re-applied.
    Existing,
    /// The repository branch failed; the message says why.
    Failed(String),
}

/// Outcome for one source repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryOutcome {
    pub source_slug: String,
    /// `owner/name` on the target.
    pub target: String,
    pub collaborators_applied: usize,
    pub status: RepositoryStatus,
}

/// Report of a completed migration run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Target organization name.
    pub organization: Option<String>,

    /// Whether the organization was created by this run.
    pub organization_created: bool,

    /// Team names ensured on the organization.
    pub teams: Vec<String>,

    /// Number of team memberships applied.
    pub team_members_applied: usize,

    /// Distinct users ensured on the target.
    pub users_ensured: usize,

    /// Users created by this run.
    pub users_created: usize,

    /// One entry per repository attempted.
    pub repositories: Vec<RepositoryOutcome>,

    /// Warnings generated during migration.
    pub warnings: Vec<String>,

    /// Start time of migration.
    pub started_at: Option<DateTime<Utc>>,

    /// End time of migration.
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark the migration as complete.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// True when no repository branch failed.
    pub fn is_successful(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Repositories whose branch failed.
    pub fn failed(&self) -> impl Iterator<Item = &RepositoryOutcome> {
        self.repositories
            .iter()
            .filter(|r| matches!(r.status, RepositoryStatus::Failed(_)))
    }

    /// Add a warning to the report.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Get the duration of the migration.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Print a summary of the migration.
    pub fn print_summary(&self) {
        println!("\n=== Migration Summary ===\n");
        if let Some(org) = &self.organization {
            let created = if self.organization_created {
                " (created)"
            } else {
                ""
            };
            println!("Organization:       {org}{created}");
        }
        println!("Teams:              {}", self.teams.join(", "));
        println!("Team memberships:   {}", self.team_members_applied);
        println!(
            "Users ensured:      {} ({} created)",
            self.users_ensured, self.users_created
        );

        if !self.repositories.is_empty() {
            println!("\nRepositories ({}):", self.repositories.len());
            for repo in &self.repositories {
                match &repo.status {
                    RepositoryStatus::Migrated => println!(
                        "  ✓ {} -> {} ({} collaborators)",
                        repo.source_slug, repo.target, repo.collaborators_applied
                    ),
                    RepositoryStatus::Existing => println!(
                        "  = {} -> {} already present ({} collaborators)",
                        repo.source_slug, repo.target, repo.collaborators_applied
                    ),
                    RepositoryStatus::Failed(message) => {
                        println!("  ✗ {} -> {}: {message}", repo.source_slug, repo.target)
                    }
                }
            }
        }

        if let Some(duration) = self.duration() {
            println!("\nCompleted in {} seconds", duration.num_seconds());
        }

        if !self.warnings.is_empty() {
            println!("\nWarnings ({}):", self.warnings.len());
            for warning in &self.warnings {
                println!("  - {warning}");
            }
        }

        let status = if self.is_successful() {
            "SUCCESS"
        } else {
            "FAILED"
        };
        println!("\nOverall Status: {status}");
    }
}
