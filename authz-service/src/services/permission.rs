//! Permission inheritance engine.
//!
//! A user's permissions are the enabled roles' permission sets folded by a
//! [`PermissionInheritance`] strategy, then merged with the user's direct
//! grants by a [`MergeStrategy`]. Results are cached per user until an
//! explicit invalidation or TTL expiry.

use futures::future::try_join_all;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::PermissionConfig;
use crate::models::{
    MenuId, PermissionSet, Principal, Role, RoleId, UserId, ADMIN_ROLE_KEY, ALL_PERMISSION,
};
use crate::services::cache::{self, keys, CacheBackend};
use crate::services::{AuthError, RoleStore};

const EPOCH_AREA: &str = "perm";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPermissions {
    epoch: Option<String>,
    permissions: PermissionSet,
}

/// Folds the permission sets of a user's enabled roles into one set.
pub trait PermissionInheritance: Send + Sync {
    fn name(&self) -> &'static str;
    fn inherit(&self, roles: &[Role]) -> BTreeSet<String>;
}

/// Union of every role's permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Additive;

impl PermissionInheritance for Additive {
    fn name(&self) -> &'static str {
        "additive"
    }

    fn inherit(&self, roles: &[Role]) -> BTreeSet<String> {
        roles
            .iter()
            .flat_map(|role| role.permission_keys.iter().cloned())
            .collect()
    }
}

/// The highest-priority role's permissions replace everyone else's.
/// Priority is the lowest `(sort_order, id)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Override;

impl PermissionInheritance for Override {
    fn name(&self) -> &'static str {
        "override"
    }

    fn inherit(&self, roles: &[Role]) -> BTreeSet<String> {
        roles
            .iter()
            .min_by_key(|role| (role.sort_order, role.id))
            .map(|role| role.permission_keys.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InheritanceStrategy {
    Additive,
    Override,
}

impl InheritanceStrategy {
    pub fn build(self) -> Arc<dyn PermissionInheritance> {
        match self {
            InheritanceStrategy::Additive => Arc::new(Additive),
            InheritanceStrategy::Override => Arc::new(Override),
        }
    }
}

impl std::str::FromStr for InheritanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "additive" => Ok(InheritanceStrategy::Additive),
            "override" => Ok(InheritanceStrategy::Override),
            _ => Err(format!("Invalid inheritance strategy: {}", s)),
        }
    }
}

/// How role-derived permissions combine with a user's direct grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Union,
    /// Direct grants act as a mask. No direct grants means no mask.
    Intersection,
}

impl MergeStrategy {
    pub fn apply(self, inherited: BTreeSet<String>, direct: BTreeSet<String>) -> BTreeSet<String> {
        match self {
            MergeStrategy::Union => {
                let mut merged = inherited;
                merged.extend(direct);
                merged
            }
            MergeStrategy::Intersection => {
                if direct.is_empty() || direct.contains(ALL_PERMISSION) {
                    inherited
                } else if inherited.contains(ALL_PERMISSION) {
                    direct
                } else {
                    inherited.intersection(&direct).cloned().collect()
                }
            }
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "union" => Ok(MergeStrategy::Union),
            "intersection" => Ok(MergeStrategy::Intersection),
            _ => Err(format!("Invalid merge strategy: {}", s)),
        }
    }
}

#[derive(Clone)]
pub struct PermissionEngine {
    store: RoleStore,
    cache: Arc<dyn CacheBackend>,
    inheritance: Arc<dyn PermissionInheritance>,
    merge: MergeStrategy,
    admin_bypass: bool,
    ttl_seconds: u64,
}

impl PermissionEngine {
    pub fn new(store: RoleStore, cache: Arc<dyn CacheBackend>, config: &PermissionConfig) -> Self {
        Self {
            store,
            cache,
            inheritance: config.inheritance.build(),
            merge: config.merge,
            admin_bypass: config.admin_bypass,
            ttl_seconds: config.cache_ttl_seconds,
        }
    }

    /// Replace the configured inheritance strategy with a custom one.
    pub fn with_inheritance(mut self, inheritance: Arc<dyn PermissionInheritance>) -> Self {
        self.inheritance = inheritance;
        self
    }

    pub fn inheritance_name(&self) -> &'static str {
        self.inheritance.name()
    }

    pub fn bypasses(&self, principal: &Principal) -> bool {
        self.admin_bypass && principal.is_admin
    }

    /// Cached permission set for the principal, computed on a miss.
    ///
    /// Cache failures degrade to recomputation; they never grant anything.
    pub async fn calculate_permissions(
        &self,
        principal: &Principal,
    ) -> Result<PermissionSet, AuthError> {
        if self.bypasses(principal) {
            counter!("authz_admin_bypass_total", "check" => "permissions").increment(1);
            return Ok(PermissionSet::all());
        }

        let Some(epoch) = self.epoch(principal.user_id).await else {
            return self.compute(principal.user_id).await;
        };

        let key = keys::permissions(principal.user_id);
        match cache::get_json::<CachedPermissions>(self.cache.as_ref(), &key).await {
            Ok(Some(cached)) if cached.epoch == epoch => {
                counter!("authz_permission_cache_total", "result" => "hit").increment(1);
                tracing::debug!(user_id = %principal.user_id, "Permission cache hit");
                return Ok(cached.permissions);
            }
            Ok(_) => {
                counter!("authz_permission_cache_total", "result" => "miss").increment(1);
                tracing::debug!(user_id = %principal.user_id, "Permission cache miss");
            }
            Err(e) => {
                counter!("authz_cache_errors_total", "op" => "get").increment(1);
                tracing::warn!(
                    user_id = %principal.user_id,
                    error = %e,
                    "Permission cache read failed, recomputing"
                );
            }
        }

        self.store_computed(principal.user_id, epoch).await
    }

    /// Compute from the store, bypassing the cache read, and refresh the cache.
    pub async fn recalculate_permissions(
        &self,
        principal: &Principal,
    ) -> Result<PermissionSet, AuthError> {
        if self.bypasses(principal) {
            return Ok(PermissionSet::all());
        }

        match self.epoch(principal.user_id).await {
            Some(epoch) => self.store_computed(principal.user_id, epoch).await,
            None => self.compute(principal.user_id).await,
        }
    }

    /// Invalidation epoch for the user, read before any role data. `None`
    /// when it cannot be read, in which case nothing is cached.
    async fn epoch(&self, user_id: UserId) -> Option<Option<String>> {
        match cache::current_epoch(self.cache.as_ref(), &keys::epoch(EPOCH_AREA, user_id)).await {
            Ok(epoch) => Some(epoch),
            Err(e) => {
                counter!("authz_cache_errors_total", "op" => "get").increment(1);
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Permission epoch read failed, recomputing without caching"
                );
                None
            }
        }
    }

    async fn store_computed(
        &self,
        user_id: UserId,
        epoch: Option<String>,
    ) -> Result<PermissionSet, AuthError> {
        let permissions = self.compute(user_id).await?;

        let entry = CachedPermissions {
            epoch,
            permissions: permissions.clone(),
        };
        let key = keys::permissions(user_id);
        if let Err(e) = cache::set_json(self.cache.as_ref(), &key, &entry, self.ttl_seconds).await {
            counter!("authz_cache_errors_total", "op" => "set").increment(1);
            tracing::warn!(user_id = %user_id, error = %e, "Failed to cache permissions");
        }

        Ok(permissions)
    }

    async fn compute(&self, user_id: UserId) -> Result<PermissionSet, AuthError> {
        let roles = self.store.enabled_roles_of_user(user_id).await?;
        let inherited = self.inheritance.inherit(&roles);
        let direct = self.store.direct_permissions(user_id).await?;
        let merged = self.merge.apply(inherited, direct);

        tracing::debug!(
            user_id = %user_id,
            roles = roles.len(),
            permissions = merged.len(),
            strategy = self.inheritance.name(),
            "Computed permissions"
        );
        Ok(PermissionSet::from(merged))
    }

    pub async fn has_permission(
        &self,
        principal: &Principal,
        permission: &str,
    ) -> Result<bool, AuthError> {
        let granted = self.calculate_permissions(principal).await?.contains(permission);
        if !granted {
            tracing::debug!(user_id = %principal.user_id, permission, "Permission denied");
        }
        Ok(granted)
    }

    pub async fn has_any_permission(
        &self,
        principal: &Principal,
        permissions: &[&str],
    ) -> Result<bool, AuthError> {
        let granted = self.calculate_permissions(principal).await?;
        Ok(permissions.iter().any(|p| granted.contains(p)))
    }

    pub async fn lacks_permission(
        &self,
        principal: &Principal,
        permission: &str,
    ) -> Result<bool, AuthError> {
        Ok(!self.has_permission(principal, permission).await?)
    }

    /// Unknown menus are `NotFound`, not a denial.
    pub async fn has_menu_permission(
        &self,
        principal: &Principal,
        menu_id: MenuId,
    ) -> Result<bool, AuthError> {
        let permission = self.store.menu_permission(menu_id).await?;
        self.has_permission(principal, &permission).await
    }

    /// Keys of the principal's enabled roles; bypassing admins also carry
    /// the admin key.
    pub async fn role_keys(&self, principal: &Principal) -> Result<BTreeSet<String>, AuthError> {
        let mut keys = self.store.role_keys_of_user(principal.user_id).await?;
        if self.bypasses(principal) {
            keys.insert(ADMIN_ROLE_KEY.to_string());
        }
        Ok(keys)
    }

    pub async fn has_role(&self, principal: &Principal, role_key: &str) -> Result<bool, AuthError> {
        if self.bypasses(principal) {
            return Ok(true);
        }
        Ok(self.role_keys(principal).await?.contains(role_key))
    }

    pub async fn has_any_role(
        &self,
        principal: &Principal,
        role_keys: &[&str],
    ) -> Result<bool, AuthError> {
        if self.bypasses(principal) {
            return Ok(true);
        }
        let held = self.role_keys(principal).await?;
        Ok(role_keys.iter().any(|key| held.contains(*key)))
    }

    /// Move the user's epoch on and drop the cached set. Entries from
    /// computations still in flight carry the old epoch and are never served.
    /// Failure is reported, since a stale entry would keep granting revoked
    /// permissions.
    pub async fn invalidate(&self, user_id: UserId) -> Result<(), AuthError> {
        let report = |e: anyhow::Error| {
            counter!("authz_cache_errors_total", "op" => "invalidate").increment(1);
            tracing::error!(user_id = %user_id, error = %e, "Permission invalidation failed");
            AuthError::CacheUnavailable(e)
        };

        cache::bump_epoch(
            self.cache.as_ref(),
            &keys::epoch(EPOCH_AREA, user_id),
            self.ttl_seconds,
        )
        .await
        .map_err(report)?;
        self.cache
            .delete(&keys::permissions(user_id))
            .await
            .map_err(report)?;

        tracing::info!(user_id = %user_id, "Invalidated cached permissions");
        Ok(())
    }

    /// Invalidate every user holding the role. Returns the affected users.
    pub async fn invalidate_role(&self, role_id: RoleId) -> Result<Vec<UserId>, AuthError> {
        let users = self.store.users_with_role(role_id).await?;
        try_join_all(users.iter().map(|user_id| self.invalidate(*user_id))).await?;

        tracing::info!(role_id = %role_id, users = users.len(), "Invalidated role holders");
        Ok(users)
    }
}
