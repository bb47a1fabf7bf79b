//! Read-only view of the source system.

use crate::error::Result;
use crate::types::{PermissionGrant, PermissionScope, ProjectInfo, RepositoryInfo, UserIdentity};
use async_trait::async_trait;

/// Accessor over the source system's projects, repositories, permissions and
/// groups.
///
/// Every operation is a single logical remote call without retries. Non-2xx
/// responses surface as [`crate::MigrationError::RemoteApi`].
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch a project by key.
    async fn get_project(&self, key: &str) -> Result<ProjectInfo>;

    /// Fetch a repository of a project.
    async fn get_repository(&self, project_key: &str, slug: &str) -> Result<RepositoryInfo>;

    /// List every repository of a project, following pagination.
    async fn list_repositories(&self, project_key: &str) -> Result<Vec<RepositoryInfo>>;

    /// Direct user grants at the given scope.
    async fn list_user_permissions(&self, scope: &PermissionScope) -> Result<Vec<PermissionGrant>>;

    /// Group grants at the given scope.
    async fn list_group_permissions(&self, scope: &PermissionScope)
        -> Result<Vec<PermissionGrant>>;

    /// Members of a group.
    async fn list_group_members(&self, group: &str) -> Result<Vec<UserIdentity>>;
}
