//! Gitea API client with create-or-get semantics.

use crate::error::{MigrationError, Result};
use crate::target::{
    AccessMode, MigrateRepoOptions, OrgHandle, RepoHandle, TargetClient, TeamHandle, TeamTemplate,
    UserHandle,
};
use crate::types::{PermissionLevel, UserIdentity};

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Serialize)]
struct CreateOrgRequest<'a> {
    username: &'a str,
    description: &'a str,
    visibility: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrgResponse {
    id: i64,
    username: String,
}

#[derive(Debug, Serialize)]
struct CreateUserRequest<'a> {
    source_id: i64,
    login_name: String,
    username: &'a str,
    full_name: &'a str,
    email: &'a str,
    must_change_password: bool,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: i64,
    login: String,
}

#[derive(Debug, Serialize)]
struct CreateTeamRequest<'a> {
    name: &'a str,
    description: &'a str,
    permission: AccessMode,
    includes_all_repositories: bool,
    can_create_org_repo: bool,
    units: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct TeamResponse {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TeamSearchResponse {
    #[serde(default)]
    data: Vec<TeamResponse>,
}

#[derive(Debug, Serialize)]
struct CollaboratorRequest {
    permission: AccessMode,
}

#[derive(Debug, Serialize)]
struct MigrateRepoRequest<'a> {
    clone_addr: &'a str,
    auth_username: &'a str,
    auth_password: &'a str,
    repo_owner: &'a str,
    repo_name: &'a str,
    description: &'a str,
    private: bool,
    mirror: bool,
    service: &'a str,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    id: i64,
    name: String,
}

/// Client for the Gitea v1 API.
pub struct GiteaClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl GiteaClient {
    /// Create a new Gitea client.
    ///
    /// `skip_verify` disables TLS certificate verification for self-hosted
    /// instances with private CAs. Requests carry no per-request timeout
    /// because repository imports can run arbitrarily long; the caller bounds
    /// the whole run instead.
    pub fn new(server: &str, token: &str, skip_verify: bool) -> Result<Self> {
        let server = server.trim().trim_end_matches('/');
        if server.is_empty() || token.is_empty() {
            return Err(MigrationError::Config(
                "missing gitea server or token".to_string(),
            ));
        }
        let mut base_url = Url::parse(server)
            .map_err(|e| MigrationError::Config(format!("invalid gitea server '{server}': {e}")))?;
        base_url
            .path_segments_mut()
            .map_err(|_| MigrationError::Config(format!("invalid gitea server '{server}'")))?
            .pop_if_empty()
            .extend(["api", "v1"]);

        let client = Client::builder()
            .user_agent("bb2gitea")
            .connect_timeout(std::time::Duration::from_secs(30))
            .danger_accept_invalid_certs(skip_verify)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    /// API URL for `segments`, each percent-encoded as a single path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    /// Send a request and return the raw response, failing on non-2xx.
    async fn send<B: Serialize>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(segments);
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header("Authorization", format!("token {}", self.token));

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MigrationError::RemoteApi {
                status: status.as_u16(),
                message: format!("{method} {}: {body}", url.path()),
            });
        }

        Ok(response)
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>> {
        match self.send::<()>(Method::GET, segments, &[], None).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND.as_u16()) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, segments: &[&str], body: &B) -> Result<T> {
        let response = self.send(Method::POST, segments, &[], Some(body)).await?;
        Ok(response.json().await?)
    }

    async fn put<B: Serialize>(&self, segments: &[&str], body: Option<&B>) -> Result<()> {
        self.send(Method::PUT, segments, &[], body).await?;
        Ok(())
    }

    /// Team of an organization whose name matches `name` exactly.
    async fn find_team(&self, org: &str, name: &str) -> Result<Option<TeamResponse>> {
        let response = self
            .send::<()>(
                Method::GET,
                &["orgs", org, "teams", "search"],
                &[("q", name)],
                None,
            )
            .await?;
        let result: TeamSearchResponse = response.json().await?;
        Ok(result
            .data
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name)))
    }
}

#[async_trait]
impl TargetClient for GiteaClient {
    async fn ensure_organization(
        &self,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<OrgHandle> {
        if let Some(org) = self.get_optional::<OrgResponse>(&["orgs", name]).await? {
            debug!(org = %org.username, "Organization already exists");
            return Ok(OrgHandle {
                id: org.id,
                name: org.username,
                created: false,
            });
        }

        let visibility = if is_public { "public" } else { "private" };
        let org: OrgResponse = self
            .post(
                &["orgs"],
                &CreateOrgRequest {
                    username: name,
                    description,
                    visibility,
                },
            )
            .await?;
        info!(org = %org.username, visibility, "Created organization");

        Ok(OrgHandle {
            id: org.id,
            name: org.username,
            created: true,
        })
    }

    async fn ensure_user(&self, identity: &UserIdentity, source_id: i64) -> Result<UserHandle> {
        if let Some(user) = self
            .get_optional::<UserResponse>(&["users", identity.username.as_str()])
            .await?
        {
            debug!(username = %user.login, "User already exists");
            return Ok(UserHandle {
                id: user.id,
                username: user.login,
                created: false,
            });
        }

        let user: UserResponse = self
            .post(
                &["admin", "users"],
                &CreateUserRequest {
                    source_id,
                    login_name: identity.normalized(),
                    username: &identity.username,
                    full_name: &identity.display_name,
                    email: &identity.email,
                    must_change_password: false,
                },
            )
            .await?;
        info!(
            username = %user.login,
            fullname = %identity.display_name,
            source_id,
            "Created user"
        );

        Ok(UserHandle {
            id: user.id,
            username: user.login,
            created: true,
        })
    }

    async fn ensure_team(&self, org: &str, level: PermissionLevel) -> Result<TeamHandle> {
        let template = TeamTemplate::for_level(level)?;

        if let Some(team) = self.find_team(org, template.name).await? {
            debug!(org = %org, team = %team.name, "Team already exists");
            return Ok(TeamHandle {
                id: team.id,
                name: team.name,
                created: false,
            });
        }

        let team: TeamResponse = self
            .post(
                &["orgs", org, "teams"],
                &CreateTeamRequest {
                    name: template.name,
                    description: template.name,
                    permission: template.permission,
                    includes_all_repositories: template.includes_all_repositories,
                    can_create_org_repo: template.can_create_org_repo,
                    units: template.units,
                },
            )
            .await?;
        info!(org = %org, team = %team.name, permission = %template.permission, "Created team");

        Ok(TeamHandle {
            id: team.id,
            name: team.name,
            created: true,
        })
    }

    async fn add_team_member(&self, team: &TeamHandle, username: &str) -> Result<()> {
        let team_id = team.id.to_string();
        self.put::<()>(&["teams", team_id.as_str(), "members", username], None)
            .await?;
        debug!(team = %team.name, username = %username, "Added team member");
        Ok(())
    }

    async fn add_collaborator(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        let permission = AccessMode::for_collaborator(level)?;
        self.put(
            &["repos", owner, repo, "collaborators", username],
            Some(&CollaboratorRequest { permission }),
        )
        .await?;
        debug!(repo = %format!("{owner}/{repo}"), username = %username, %permission, "Added collaborator");
        Ok(())
    }

    async fn migrate_repository(&self, options: &MigrateRepoOptions) -> Result<RepoHandle> {
        let existing = self
            .get_optional::<RepoResponse>(&["repos", options.owner.as_str(), options.name.as_str()])
            .await?;
        if let Some(repo) = existing {
            info!(
                owner = %options.owner,
                name = %repo.name,
                "Repository already exists, skipping import"
            );
            return Ok(RepoHandle {
                id: repo.id,
                owner: options.owner.clone(),
                name: repo.name,
                imported: false,
            });
        }

        info!(owner = %options.owner, name = %options.name, "Importing repository");
        let repo: RepoResponse = self
            .post(
                &["repos", "migrate"],
                &MigrateRepoRequest {
                    clone_addr: &options.clone_addr,
                    auth_username: &options.auth_username,
                    auth_password: &options.auth_password,
                    repo_owner: &options.owner,
                    repo_name: &options.name,
                    description: &options.description,
                    private: options.private,
                    mirror: false,
                    service: "git",
                },
            )
            .await?;
        info!(owner = %options.owner, name = %repo.name, "Repository imported");

        Ok(RepoHandle {
            id: repo.id,
            owner: options.owner.clone(),
            name: repo.name,
            imported: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GiteaClient {
        GiteaClient::new(&server.uri(), "gitea_token", false).unwrap()
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        assert!(matches!(
            GiteaClient::new("https://gitea.example.com", "", true),
            Err(MigrationError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_organization_existing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/platform"))
            .and(header("Authorization", "token gitea_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 7, "username": "platform"})),
            )
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/orgs"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let gitea = client(&mock_server);
        let first = gitea.ensure_organization("platform", "", true).await.unwrap();
        let second = gitea.ensure_organization("platform", "", true).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.created);
    }

    #[tokio::test]
    async fn test_ensure_organization_creates_on_404() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/platform"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/orgs"))
            .and(body_partial_json(json!({
                "username": "platform",
                "visibility": "private"
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 9, "username": "platform"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let org = client(&mock_server)
            .ensure_organization("platform", "Platform team", false)
            .await
            .unwrap();
        assert!(org.created);
        assert_eq!(org.id, 9);
    }

    #[tokio::test]
    async fn test_ensure_organization_other_lookup_error_is_fatal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/platform"))
            .respond_with(ResponseTemplate::new(500).set_body_string("database locked"))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/orgs"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .ensure_organization("platform", "", true)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_ensure_user_creates_with_source_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/users/Alice"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/admin/users"))
            .and(body_partial_json(json!({
                "source_id": 3,
                "login_name": "alice",
                "username": "Alice",
                "full_name": "Alice Liddell",
                "email": "alice@example.com",
                "must_change_password": false
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 11, "login": "alice"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let identity = UserIdentity::new("Alice", "Alice Liddell", "alice@example.com");
        let user = client(&mock_server).ensure_user(&identity, 3).await.unwrap();
        assert!(user.created);
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_ensure_team_reuses_exact_match() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/platform/teams/search"))
            .and(query_param("q", "OrgWriter"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "data": [
                    {"id": 4, "name": "OrgWriters-legacy"},
                    {"id": 5, "name": "OrgWriter"}
                ]
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/orgs/platform/teams"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let team = client(&mock_server)
            .ensure_team("platform", PermissionLevel::ProjectWrite)
            .await
            .unwrap();
        assert_eq!(team.id, 5);
        assert!(!team.created);
    }

    #[tokio::test]
    async fn test_ensure_team_creates_from_template() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/platform/teams/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "data": []})),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/orgs/platform/teams"))
            .and(body_partial_json(json!({
                "name": "RepoCreater",
                "permission": "read",
                "includes_all_repositories": false,
                "can_create_org_repo": true
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 12, "name": "RepoCreater"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let team = client(&mock_server)
            .ensure_team("platform", PermissionLevel::RepoCreate)
            .await
            .unwrap();
        assert!(team.created);
        assert_eq!(team.name, "RepoCreater");
    }

    #[tokio::test]
    async fn test_add_collaborator_rejects_repo_create_without_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .add_collaborator("platform", "api", "alice", PermissionLevel::RepoCreate)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPermission(_)));
    }

    #[tokio::test]
    async fn test_add_collaborator_and_team_member() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/v1/repos/platform/api/collaborators/bob"))
            .and(body_partial_json(json!({"permission": "write"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/api/v1/teams/5/members/bob"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gitea = client(&mock_server);
        for _ in 0..2 {
            gitea
                .add_collaborator("platform", "api", "bob", PermissionLevel::RepoWrite)
                .await
                .unwrap();
        }

        let team = TeamHandle {
            id: 5,
            name: "OrgWriter".to_string(),
            created: false,
        };
        gitea.add_team_member(&team, "bob").await.unwrap();
    }

    fn migrate_options() -> MigrateRepoOptions {
        MigrateRepoOptions {
            owner: "platform".to_string(),
            name: "api".to_string(),
            clone_addr: "https://stash.example.com/scm/prj/api.git".to_string(),
            description: "API service".to_string(),
            private: true,
            auth_username: "migrator".to_string(),
            auth_password: "bb_token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_migrate_repository_imports_when_absent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/repos/platform/api"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/repos/migrate"))
            .and(body_partial_json(json!({
                "clone_addr": "https://stash.example.com/scm/prj/api.git",
                "auth_username": "migrator",
                "auth_password": "bb_token",
                "repo_owner": "platform",
                "repo_name": "api",
                "private": true
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 21, "name": "api"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let repo = client(&mock_server)
            .migrate_repository(&migrate_options())
            .await
            .unwrap();
        assert!(repo.imported);
        assert_eq!(repo.full_name(), "platform/api");
    }

    #[tokio::test]
    async fn test_migrate_repository_skips_existing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/repos/platform/api"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 21, "name": "api"})),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/repos/migrate"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let repo = client(&mock_server)
            .migrate_repository(&migrate_options())
            .await
            .unwrap();
        assert!(!repo.imported);
    }

    #[tokio::test]
    async fn test_ensure_user_existing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/users/Alice"))
            .and(header("Authorization", "token gitea_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 11, "login": "alice"})),
            )
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/admin/users"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let gitea = client(&mock_server);
        let identity = UserIdentity::new("Alice", "Alice Liddell", "alice@example.com");
        let first = gitea.ensure_user(&identity, 3).await.unwrap();
        let second = gitea.ensure_user(&identity, 3).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.created);
        assert_eq!(first.id, 11);
    }

    #[tokio::test]
    async fn test_ensure_user_other_lookup_error_is_fatal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/users/alice"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/admin/users"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let identity = UserIdentity::new("alice", "Alice", "alice@example.com");
        let err = client(&mock_server)
            .ensure_user(&identity, 0)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn test_reserved_characters_are_escaped_in_paths() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/v1/repos/org/repo/collaborators/evil%3Fx=1%23frag"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/api/v1/repos/org/repo/collaborators/evil"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&mock_server)
            .await;

        client(&mock_server)
            .add_collaborator("org", "repo", "evil?x=1#frag", PermissionLevel::RepoRead)
            .await
            .unwrap();
    }
}
