//! End-to-end provisioning of a Bitbucket project on Gitea.

use crate::error::{MigrationError, Result};
use crate::permission::{flatten, GroupCache};
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::source::SourceClient;
use crate::target::{MigrateRepoOptions, TargetClient};
use crate::types::{
    MigrationReport, MigrationRequest, PermissionGrant, PermissionScope, ProjectInfo,
    RepositoryInfo, RepositoryOutcome, RepositoryStatus, ResolvedPermissions,
};

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound for a whole run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Run-wide settings for a [`Migrator`].
#[derive(Debug, Clone)]
pub struct MigratorSettings {
    /// Gitea authentication source assigned to every provisioned user.
    pub source_id: i64,

    /// Source credentials Gitea uses to clone repositories.
    pub auth_username: String,
    pub auth_password: String,

    /// Upper bound on a whole run.
    pub timeout: Duration,
}

impl MigratorSettings {
    pub fn new(auth_username: impl Into<String>, auth_password: impl Into<String>) -> Self {
        Self {
            source_id: 0,
            auth_username: auth_username.into(),
            auth_password: auth_password.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_source_id(mut self, source_id: i64) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Mutable state shared by every step of one run.
struct RunContext<'a, S: SourceClient + ?Sized> {
    groups: GroupCache<'a, S>,
    ensured_users: HashSet<String>,
    report: MigrationReport,
}

/// Drives a migration from a source project to a target organization.
///
/// Every remote write goes through an idempotent `ensure_*`/add operation, so
/// a run that failed or timed out part-way can simply be started again.
pub struct Migrator<S, T> {
    source: S,
    target: T,
    settings: MigratorSettings,
    progress: MigrationProgress,
}

impl<S: SourceClient, T: TargetClient> Migrator<S, T> {
    pub fn new(source: S, target: T, settings: MigratorSettings) -> Self {
        Self {
            source,
            target,
            settings,
            progress: MigrationProgress::new(),
        }
    }

    /// Set a progress tracker.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &MigrationProgress {
        &self.progress
    }

    /// Run the migration within the configured timeout.
    ///
    /// In single-repository mode any failure aborts the run. In whole-project
    /// mode a failing repository is recorded in the report and the remaining
    /// repositories are still migrated. Work completed before a timeout is
    /// left in place.
    pub async fn migrate(&self, request: &MigrationRequest) -> Result<MigrationReport> {
        let timeout = self.settings.timeout;
        match tokio::time::timeout(timeout, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?timeout, "Migration timed out");
                Err(MigrationError::Timeout(timeout))
            }
        }
    }

    async fn run(&self, request: &MigrationRequest) -> Result<MigrationReport> {
        validate_request(request)?;

        let mut ctx = RunContext {
            groups: GroupCache::new(&self.source),
            ensured_users: HashSet::new(),
            report: MigrationReport::new(),
        };

        info!(project = %request.project_key, repo = ?request.repo_slug, "Starting migration");
        self.progress.set_phase(MigrationPhase::Start, None);

        let project = self.source.get_project(&request.project_key).await?;
        info!(project = %project.key, name = %project.name, "Resolved project");
        self.progress.set_phase(MigrationPhase::ProjectResolved, None);

        let scope = PermissionScope::Project(project.key.clone());
        let grants = self.fetch_grants(&scope).await?;
        let permissions = flatten(&grants, &mut ctx.groups).await?;
        self.progress
            .set_phase(MigrationPhase::PermissionsResolved, None);

        self.ensure_users(&mut ctx, &permissions).await?;
        self.progress.set_phase(MigrationPhase::UsersEnsured, None);

        let owner = request
            .target_owner
            .clone()
            .unwrap_or_else(|| project.name.clone());
        self.ensure_organization(&mut ctx, &owner, &project, &permissions)
            .await?;
        self.progress.set_phase(MigrationPhase::OrgEnsured, None);

        let repositories = match &request.repo_slug {
            Some(slug) => vec![self.source.get_repository(&project.key, slug).await?],
            None => self.source.list_repositories(&project.key).await?,
        };
        self.progress.set_total(repositories.len() as u64);

        let name_override = match &request.target_repo {
            Some(name) if repositories.len() == 1 => Some(name.clone()),
            Some(name) => {
                let message = format!(
                    "target repository name '{name}' ignored: {} repositories selected",
                    repositories.len()
                );
                warn!("{message}");
                ctx.report.add_warning(message);
                None
            }
            None => None,
        };

        for repo in &repositories {
            let target_name = name_override.clone().unwrap_or_else(|| repo.name.clone());
            let result = self
                .migrate_repository(&mut ctx, &project.key, repo, &owner, &target_name)
                .await;
            self.progress.repository_finished(&repo.slug);

            match result {
                Ok(outcome) => ctx.report.repositories.push(outcome),
                Err(e) if request.is_project_mode() => {
                    warn!(repo = %repo.slug, error = %e, "Repository migration failed, continuing");
                    ctx.report.repositories.push(RepositoryOutcome {
                        source_slug: repo.slug.clone(),
                        target: format!("{owner}/{target_name}"),
                        collaborators_applied: 0,
                        status: RepositoryStatus::Failed(e.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.progress.set_phase(MigrationPhase::Done, None);
        ctx.report.complete();
        info!(
            repositories = ctx.report.repositories.len(),
            failed = ctx.report.failed().count(),
            group_lookups = ctx.groups.lookups(),
            "Migration finished"
        );

        Ok(ctx.report)
    }

    async fn fetch_grants(&self, scope: &PermissionScope) -> Result<Vec<PermissionGrant>> {
        let mut grants = self.source.list_user_permissions(scope).await?;
        grants.extend(self.source.list_group_permissions(scope).await?);
        debug!(scope = %scope, grants = grants.len(), "Fetched permission grants");
        Ok(grants)
    }

    async fn ensure_users(
        &self,
        ctx: &mut RunContext<'_, S>,
        permissions: &ResolvedPermissions,
    ) -> Result<()> {
        for (username, identity) in &permissions.users {
            if ctx.ensured_users.contains(username) {
                continue;
            }
            let user = self
                .target
                .ensure_user(identity, self.settings.source_id)
                .await?;
            ctx.ensured_users.insert(username.clone());
            ctx.report.users_ensured += 1;
            if user.created {
                ctx.report.users_created += 1;
            }
        }
        Ok(())
    }

    async fn ensure_organization(
        &self,
        ctx: &mut RunContext<'_, S>,
        owner: &str,
        project: &ProjectInfo,
        permissions: &ResolvedPermissions,
    ) -> Result<()> {
        info!(org = %owner, "Ensuring organization");
        let org = self
            .target
            .ensure_organization(owner, &project.description, project.is_public)
            .await?;
        ctx.report.organization = Some(org.name.clone());
        ctx.report.organization_created = org.created;

        info!(org = %owner, "Applying organization permissions");
        for (level, users) in permissions.map.iter() {
            let team = self.target.ensure_team(owner, level).await?;
            for username in users {
                self.target.add_team_member(&team, username).await?;
                ctx.report.team_members_applied += 1;
            }
            ctx.report.teams.push(team.name);
        }
        Ok(())
    }

    async fn migrate_repository(
        &self,
        ctx: &mut RunContext<'_, S>,
        project_key: &str,
        repo: &RepositoryInfo,
        owner: &str,
        name: &str,
    ) -> Result<RepositoryOutcome> {
        info!(repo = %repo.slug, target = %format!("{owner}/{name}"), "Migrating repository");
        let clone_addr = repo
            .http_clone_url()
            .ok_or_else(|| MigrationError::CloneLinkNotFound(repo.slug.clone()))?
            .to_string();
        self.progress
            .set_phase(MigrationPhase::RepoResolved, Some(&repo.slug));

        let scope = PermissionScope::repository(project_key, &repo.slug);
        let grants = self.fetch_grants(&scope).await?;
        let permissions = flatten(&grants, &mut ctx.groups).await?;
        self.progress
            .set_phase(MigrationPhase::RepoPermissionsResolved, Some(&repo.slug));

        self.ensure_users(ctx, &permissions).await?;
        self.progress
            .set_phase(MigrationPhase::RepoUsersEnsured, Some(&repo.slug));

        let handle = self
            .target
            .migrate_repository(&MigrateRepoOptions {
                owner: owner.to_string(),
                name: name.to_string(),
                clone_addr,
                description: repo.description.clone(),
                private: !repo.is_public,
                auth_username: self.settings.auth_username.clone(),
                auth_password: self.settings.auth_password.clone(),
            })
            .await?;
        self.progress
            .set_phase(MigrationPhase::RepoMigrated, Some(&repo.slug));

        let mut collaborators = 0;
        for (level, users) in permissions.map.iter() {
            for username in users {
                self.target
                    .add_collaborator(&handle.owner, &handle.name, username, level)
                    .await?;
                collaborators += 1;
            }
        }
        self.progress
            .set_phase(MigrationPhase::CollaboratorsApplied, Some(&repo.slug));

        Ok(RepositoryOutcome {
            source_slug: repo.slug.clone(),
            target: handle.full_name(),
            collaborators_applied: collaborators,
            status: if handle.imported {
                RepositoryStatus::Migrated
            } else {
                RepositoryStatus::Existing
            },
        })
    }
}

fn validate_request(request: &MigrationRequest) -> Result<()> {
    if request.project_key.trim().is_empty() {
        return Err(MigrationError::Config("project key is empty".to_string()));
    }
    if matches!(&request.repo_slug, Some(slug) if slug.trim().is_empty()) {
        return Err(MigrationError::Config("repository slug is empty".to_string()));
    }
    Ok(())
}
