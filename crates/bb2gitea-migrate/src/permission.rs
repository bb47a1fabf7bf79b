//! Flattening of user and group grants into per-level user sets.

use crate::error::{MigrationError, Result};
use crate::source::SourceClient;
use crate::types::{GrantSubject, PermissionGrant, ResolvedPermissions, UserIdentity};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Resolves a group name to its members.
#[async_trait]
pub trait GroupResolver: Send {
    async fn members(&mut self, group: &str) -> Result<Vec<UserIdentity>>;
}

/// Memoizing [`GroupResolver`] over a [`SourceClient`].
///
/// Each distinct group is fetched at most once for the lifetime of the cache,
/// which the orchestrator keeps for a whole run.
pub struct GroupCache<'a, S: SourceClient + ?Sized> {
    source: &'a S,
    groups: HashMap<String, Vec<UserIdentity>>,
    lookups: usize,
}

impl<'a, S: SourceClient + ?Sized> GroupCache<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            groups: HashMap::new(),
            lookups: 0,
        }
    }

    /// Number of remote lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.lookups
    }
}

#[async_trait]
impl<S: SourceClient + ?Sized> GroupResolver for GroupCache<'_, S> {
    async fn members(&mut self, group: &str) -> Result<Vec<UserIdentity>> {
        if let Some(members) = self.groups.get(group) {
            return Ok(members.clone());
        }

        self.lookups += 1;
        let members = self.source.list_group_members(group).await?;
        debug!(group = %group, members = members.len(), "Resolved group membership");
        self.groups.insert(group.to_string(), members.clone());
        Ok(members)
    }
}

/// Flatten direct and group grants into a level → users map.
///
/// Usernames are lower-cased and stored in sets, so a user reachable through
/// several grants of the same level appears once. Direct grants are applied
/// before group grants, which makes the result independent of input order;
/// a directly granted user's identity details take precedence over details
/// obtained through group membership.
///
/// A failed membership lookup is returned as
/// [`MigrationError::GroupResolution`].
pub async fn flatten<R>(grants: &[PermissionGrant], resolver: &mut R) -> Result<ResolvedPermissions>
where
    R: GroupResolver + ?Sized,
{
    let mut resolved = ResolvedPermissions::default();

    for grant in grants {
        if let GrantSubject::User(identity) = &grant.subject {
            debug!(
                account = %identity.username,
                display = %identity.display_name,
                permission = %grant.level,
                "User permission"
            );
            let username = identity.normalized();
            resolved.map.insert(grant.level, &username);
            resolved.users.insert(username, identity.clone());
        }
    }

    for grant in grants {
        if let GrantSubject::Group(group) = &grant.subject {
            debug!(group = %group, permission = %grant.level, "Group permission");
            let members =
                resolver
                    .members(group)
                    .await
                    .map_err(|e| MigrationError::GroupResolution {
                        group: group.clone(),
                        source: Box::new(e),
                    })?;

            for member in members {
                debug!(
                    account = %member.username,
                    group = %group,
                    permission = %grant.level,
                    "User permission via group"
                );
                let username = member.normalized();
                resolved.map.insert(grant.level, &username);
                resolved.users.entry(username).or_insert(member);
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionLevel;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// In-memory resolver that counts lookups per group.
    #[derive(Default)]
    struct StaticGroups {
        groups: HashMap<String, Vec<UserIdentity>>,
        calls: HashMap<String, usize>,
    }

    impl StaticGroups {
        fn with(mut self, group: &str, members: &[&str]) -> Self {
            self.groups.insert(
                group.to_string(),
                members
                    .iter()
                    .map(|m| UserIdentity::new(*m, *m, format!("{m}@example.com")))
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl GroupResolver for StaticGroups {
        async fn members(&mut self, group: &str) -> Result<Vec<UserIdentity>> {
            *self.calls.entry(group.to_string()).or_default() += 1;
            self.groups
                .get(group)
                .cloned()
                .ok_or_else(|| MigrationError::RemoteApi {
                    status: 404,
                    message: format!("group {group} not found"),
                })
        }
    }

    fn user(name: &str) -> UserIdentity {
        UserIdentity::new(name, name, format!("{}@example.com", name.to_lowercase()))
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_direct_and_group_grants() {
        let grants = vec![
            PermissionGrant::user(user("Alice"), PermissionLevel::ProjectAdmin),
            PermissionGrant::group("devs", PermissionLevel::ProjectWrite),
        ];
        let mut groups = StaticGroups::default().with("devs", &["alice", "bob"]);

        let resolved = flatten(&grants, &mut groups).await.unwrap();

        assert_eq!(
            resolved.map.users(PermissionLevel::ProjectAdmin),
            Some(&set(&["alice"]))
        );
        assert_eq!(
            resolved.map.users(PermissionLevel::ProjectWrite),
            Some(&set(&["alice", "bob"]))
        );
        assert_eq!(resolved.users.len(), 2);
        // Direct identity details win over group-derived ones.
        assert_eq!(resolved.users["alice"].username, "Alice");
    }

    #[tokio::test]
    async fn test_overlapping_groups_do_not_duplicate() {
        let grants = vec![
            PermissionGrant::user(user("Carol"), PermissionLevel::RepoWrite),
            PermissionGrant::group("devs", PermissionLevel::RepoWrite),
            PermissionGrant::group("ops", PermissionLevel::RepoWrite),
        ];
        let mut groups = StaticGroups::default()
            .with("devs", &["CAROL", "dave"])
            .with("ops", &["Dave", "carol"]);

        let resolved = flatten(&grants, &mut groups).await.unwrap();

        assert_eq!(
            resolved.map.users(PermissionLevel::RepoWrite),
            Some(&set(&["carol", "dave"]))
        );
        assert_eq!(resolved.map.grant_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_grants() {
        let mut groups = StaticGroups::default();
        let resolved = flatten(&[], &mut groups).await.unwrap();
        assert!(resolved.map.is_empty());
        assert!(resolved.users.is_empty());
    }

    #[tokio::test]
    async fn test_group_failure_is_wrapped() {
        let grants = vec![PermissionGrant::group("ghosts", PermissionLevel::ProjectRead)];
        let mut groups = StaticGroups::default();

        let err = flatten(&grants, &mut groups).await.unwrap_err();
        match err {
            MigrationError::GroupResolution { group, source } => {
                assert_eq!(group, "ghosts");
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_flatten_is_order_independent(
            seed in prop::collection::vec((0usize..5, 0usize..4, any::<bool>()), 0..16),
            shuffle in any::<u64>(),
        ) {
            let names = ["Ann", "ben", "CHLOE", "dan", "Eve"];
            let levels = [
                PermissionLevel::ProjectAdmin,
                PermissionLevel::ProjectWrite,
                PermissionLevel::ProjectRead,
                PermissionLevel::RepoCreate,
            ];
            let grants: Vec<PermissionGrant> = seed
                .iter()
                .map(|(name, level, is_group)| {
                    if *is_group {
                        PermissionGrant::group(format!("g{}", name % 2), levels[*level])
                    } else {
                        PermissionGrant::user(user(names[*name]), levels[*level])
                    }
                })
                .collect();

            let mut permuted = grants.clone();
            if !permuted.is_empty() {
                let len = permuted.len();
                permuted.rotate_left((shuffle as usize) % len);
                permuted.reverse();
            }

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (a, b) = runtime.block_on(async {
                let mut first = StaticGroups::default()
                    .with("g0", &["ann", "Ben"])
                    .with("g1", &["ben", "Dan", "eve"]);
                let mut second = StaticGroups::default()
                    .with("g0", &["ann", "Ben"])
                    .with("g1", &["ben", "Dan", "eve"]);
                (
                    flatten(&grants, &mut first).await.unwrap(),
                    flatten(&permuted, &mut second).await.unwrap(),
                )
            });

            prop_assert_eq!(&a.map, &b.map);
            for (_, users) in a.map.iter() {
                for u in users {
                    prop_assert_eq!(u, &u.to_lowercase());
                }
            }
        }
    }
}
