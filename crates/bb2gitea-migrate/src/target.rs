//! Destination system contract and the team templates applied to it.

use crate::error::{MigrationError, Result};
use crate::types::{PermissionLevel, UserIdentity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Gitea access mode for teams and collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    Admin,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    /// Collaborator access for a repository-scope level.
    ///
    /// Only `REPO_ADMIN`, `REPO_WRITE` and `REPO_READ` map; `REPO_CREATE` and
    /// project-scope levels have no collaborator equivalent.
    pub fn for_collaborator(level: PermissionLevel) -> Result<Self> {
        match level {
            PermissionLevel::RepoAdmin => Ok(Self::Admin),
            PermissionLevel::RepoWrite => Ok(Self::Write),
            PermissionLevel::RepoRead => Ok(Self::Read),
            other => Err(MigrationError::InvalidPermission(format!(
                "{other} cannot be granted to a repository collaborator"
            ))),
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository units enabled on every migrated team.
pub const DEFAULT_UNITS: &[&str] = &[
    "repo.code",
    "repo.issues",
    "repo.ext_issues",
    "repo.ext_wiki",
    "repo.packages",
    "repo.projects",
    "repo.pulls",
    "repo.releases",
    "repo.wiki",
    "repo.actions",
];

/// Fixed shape of the team created for an organization-scope level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamTemplate {
    pub name: &'static str,
    pub permission: AccessMode,
    pub includes_all_repositories: bool,
    pub can_create_org_repo: bool,
    pub units: &'static [&'static str],
}

impl TeamTemplate {
    /// Template for a project-scope level.
    pub fn for_level(level: PermissionLevel) -> Result<Self> {
        let (name, permission, includes_all_repositories, can_create_org_repo) = match level {
            PermissionLevel::ProjectAdmin => ("OrgAdmin", AccessMode::Admin, true, true),
            PermissionLevel::ProjectWrite => ("OrgWriter", AccessMode::Write, true, false),
            PermissionLevel::ProjectRead => ("OrgReader", AccessMode::Read, true, false),
            PermissionLevel::RepoCreate => ("RepoCreater", AccessMode::Read, false, true),
            other => {
                return Err(MigrationError::InvalidPermission(format!(
                    "{other} has no organization team equivalent"
                )))
            }
        };

        Ok(Self {
            name,
            permission,
            includes_all_repositories,
            can_create_org_repo,
            units: DEFAULT_UNITS,
        })
    }
}

/// Target organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgHandle {
    pub id: i64,
    pub name: String,
    /// True when this call created the organization.
    pub created: bool,
}

/// Target user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHandle {
    pub id: i64,
    pub username: String,
    /// True when this call created the user.
    pub created: bool,
}

/// Target team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamHandle {
    pub id: i64,
    pub name: String,
    pub created: bool,
}

/// Target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub id: i64,
    pub owner: String,
    pub name: String,
    /// True when this call imported the repository; false if it already existed.
    pub imported: bool,
}

impl RepoHandle {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Parameters for a server-side repository import.
#[derive(Debug, Clone)]
pub struct MigrateRepoOptions {
    pub owner: String,
    pub name: String,
    pub clone_addr: String,
    pub description: String,
    pub private: bool,
    pub auth_username: String,
    pub auth_password: String,
}

/// Accessor over the destination system with create-or-get semantics.
///
/// Every `ensure_*` operation is idempotent: calling it twice with the same
/// input leaves the remote state unchanged after the first call.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Look up an organization, creating it on 404.
    async fn ensure_organization(
        &self,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<OrgHandle>;

    /// Look up a user, creating it on 404.
    async fn ensure_user(&self, identity: &UserIdentity, source_id: i64) -> Result<UserHandle>;

    /// Find the team for a project-scope level, creating it if absent.
    async fn ensure_team(&self, org: &str, level: PermissionLevel) -> Result<TeamHandle>;

    /// Add a user to a team. Repeated calls are harmless.
    async fn add_team_member(&self, team: &TeamHandle, username: &str) -> Result<()>;

    /// Grant a user direct access to a repository.
    async fn add_collaborator(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
        level: PermissionLevel,
    ) -> Result<()>;

    /// Import a repository's full history from the source.
    async fn migrate_repository(&self, options: &MigrateRepoOptions) -> Result<RepoHandle>;
}
