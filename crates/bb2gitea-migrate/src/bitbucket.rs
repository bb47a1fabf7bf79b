//! Bitbucket Server REST client.

use crate::error::{MigrationError, Result};
use crate::source::SourceClient;
use crate::types::{
    CloneLink, PermissionGrant, PermissionLevel, PermissionScope, ProjectInfo, RepositoryInfo,
    UserIdentity,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Page size requested from every paged endpoint.
pub const PAGE_LIMIT: u32 = 200;

/// Bitbucket API response types
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BitbucketPage<T> {
    values: Vec<T>,
    #[serde(default = "default_last_page")]
    is_last_page: bool,
    next_page_start: Option<u32>,
}

fn default_last_page() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BitbucketProject {
    key: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: bool,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepo {
    slug: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    links: BitbucketLinks,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketLinks {
    #[serde(default)]
    clone: Vec<BitbucketCloneLink>,
}

#[derive(Debug, Deserialize)]
struct BitbucketCloneLink {
    href: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BitbucketUser {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketGroup {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketUserPermission {
    user: BitbucketUser,
    permission: PermissionLevel,
}

#[derive(Debug, Deserialize)]
struct BitbucketGroupPermission {
    group: BitbucketGroup,
    permission: PermissionLevel,
}

impl From<BitbucketProject> for ProjectInfo {
    fn from(p: BitbucketProject) -> Self {
        Self {
            key: p.key,
            name: p.name,
            description: p.description.unwrap_or_default(),
            is_public: p.public,
        }
    }
}

impl From<BitbucketRepo> for RepositoryInfo {
    fn from(r: BitbucketRepo) -> Self {
        Self {
            slug: r.slug,
            name: r.name,
            description: r.description.unwrap_or_default(),
            is_public: r.public,
            clone_links: r
                .links
                .clone
                .into_iter()
                .map(|l| CloneLink {
                    name: l.name,
                    href: l.href,
                })
                .collect(),
        }
    }
}

impl From<BitbucketUser> for UserIdentity {
    fn from(u: BitbucketUser) -> Self {
        let display_name = u.display_name.unwrap_or_else(|| u.name.clone());
        Self {
            username: u.name,
            display_name,
            email: u.email_address.unwrap_or_default(),
        }
    }
}

/// Client for a Bitbucket Server (Data Center) instance.
pub struct BitbucketClient {
    client: Client,
    api_url: Url,
    token: String,
}

impl BitbucketClient {
    /// Create a new Bitbucket Server client.
    ///
    /// # Arguments
    ///
    /// * `server` - Base URL of the instance, e.g. `https://stash.example.com`
    /// * `token` - Personal access token, sent as a bearer token
    pub fn new(server: &str, token: &str) -> Result<Self> {
        let server = server.trim().trim_end_matches('/');
        if server.is_empty() || token.is_empty() {
            return Err(MigrationError::Config(
                "missing bitbucket server or token".to_string(),
            ));
        }
        let mut api_url = Url::parse(server)
            .map_err(|e| MigrationError::Config(format!("invalid bitbucket server '{server}': {e}")))?;
        api_url
            .path_segments_mut()
            .map_err(|_| MigrationError::Config(format!("invalid bitbucket server '{server}'")))?
            .pop_if_empty()
            .extend(["rest", "api", "1.0"]);

        let client = Client::builder()
            .user_agent("bb2gitea")
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_url,
            token: token.to_string(),
        })
    }

    /// API URL for `segments`, each percent-encoded as a single path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    async fn bitbucket_get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(segments);
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MigrationError::RemoteApi {
                status: status.as_u16(),
                message: format!("GET {}: {body}", url.path()),
            });
        }

        Ok(response.json().await?)
    }

    async fn bitbucket_get_paginated<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut start = Some(0u32);

        while let Some(offset) = start {
            let mut params = query.to_vec();
            params.push(("limit", PAGE_LIMIT.to_string()));
            params.push(("start", offset.to_string()));

            let page: BitbucketPage<T> = self.bitbucket_get(segments, &params).await?;
            debug!(path = %segments.join("/"), start = offset, count = page.values.len(), "Fetched page");
            all_items.extend(page.values);

            // A non-final page must move the cursor forward.
            start = match (page.is_last_page, page.next_page_start) {
                (true, _) => None,
                (false, Some(next)) if next > offset => Some(next),
                (false, next) => {
                    return Err(MigrationError::Network(format!(
                        "GET {}: invalid nextPageStart {next:?} after start {offset}",
                        segments.join("/")
                    )))
                }
            };
        }

        Ok(all_items)
    }

    fn permissions_path<'a>(scope: &'a PermissionScope, kind: &'a str) -> Vec<&'a str> {
        match scope {
            PermissionScope::Project(key) => vec!["projects", key.as_str(), "permissions", kind],
            PermissionScope::Repository { project_key, slug } => {
                vec![
                    "projects",
                    project_key.as_str(),
                    "repos",
                    slug.as_str(),
                    "permissions",
                    kind,
                ]
            }
        }
    }
}

#[async_trait]
impl SourceClient for BitbucketClient {
    async fn get_project(&self, key: &str) -> Result<ProjectInfo> {
        let project: BitbucketProject = self.bitbucket_get(&["projects", key], &[]).await?;
        Ok(project.into())
    }

    async fn get_repository(&self, project_key: &str, slug: &str) -> Result<RepositoryInfo> {
        let repo: BitbucketRepo = self
            .bitbucket_get(&["projects", project_key, "repos", slug], &[])
            .await?;
        Ok(repo.into())
    }

    async fn list_repositories(&self, project_key: &str) -> Result<Vec<RepositoryInfo>> {
        let repos: Vec<BitbucketRepo> = self
            .bitbucket_get_paginated(&["projects", project_key, "repos"], &[])
            .await?;
        Ok(repos.into_iter().map(Into::into).collect())
    }

    async fn list_user_permissions(&self, scope: &PermissionScope) -> Result<Vec<PermissionGrant>> {
        let permissions: Vec<BitbucketUserPermission> = self
            .bitbucket_get_paginated(&Self::permissions_path(scope, "users"), &[])
            .await?;
        Ok(permissions
            .into_iter()
            .map(|p| PermissionGrant::user(p.user.into(), p.permission))
            .collect())
    }

    async fn list_group_permissions(
        &self,
        scope: &PermissionScope,
    ) -> Result<Vec<PermissionGrant>> {
        let permissions: Vec<BitbucketGroupPermission> = self
            .bitbucket_get_paginated(&Self::permissions_path(scope, "groups"), &[])
            .await?;
        Ok(permissions
            .into_iter()
            .map(|p| PermissionGrant::group(p.group.name, p.permission))
            .collect())
    }

    async fn list_group_members(&self, group: &str) -> Result<Vec<UserIdentity>> {
        let users: Vec<BitbucketUser> = self
            .bitbucket_get_paginated(
                &["admin", "groups", "more-members"],
                &[("context", group.to_string())],
            )
            .await?;
        Ok(users.into_iter().map(Into::into).collect())
    }
}
