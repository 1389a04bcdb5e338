//! Data-scope resolution: which departments' rows a principal may read.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::PermissionConfig;
use crate::models::{
    DataScope, DataScopeContext, DeptId, EffectiveDataScope, Principal, Role, UserId,
};
use crate::services::cache::{self, keys, CacheBackend};
use crate::services::{AuthError, DepartmentTree, RoleStore};

const EPOCH_AREA: &str = "scope";

/// Cached filter, tagged with the department it was computed for so a
/// principal whose department changed never reuses it, and with the user's
/// invalidation epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedScope {
    department_id: DeptId,
    epoch: Option<String>,
    scope: EffectiveDataScope,
}

#[derive(Clone)]
pub struct DataScopeResolver {
    store: RoleStore,
    tree: Arc<DepartmentTree>,
    cache: Arc<dyn CacheBackend>,
    admin_bypass: bool,
    ttl_seconds: u64,
}

impl DataScopeResolver {
    pub fn new(
        store: RoleStore,
        tree: Arc<DepartmentTree>,
        cache: Arc<dyn CacheBackend>,
        config: &PermissionConfig,
    ) -> Self {
        Self {
            store,
            tree,
            cache,
            admin_bypass: config.admin_bypass,
            ttl_seconds: config.cache_ttl_seconds,
        }
    }

    /// Scopes declared by the principal's enabled roles, plus the enabled
    /// user-level override if one exists.
    pub async fn resolve_data_scopes(
        &self,
        principal: &Principal,
    ) -> Result<BTreeSet<DataScope>, AuthError> {
        let mut scopes: BTreeSet<DataScope> = self
            .store
            .enabled_roles_of_user(principal.user_id)
            .await?
            .iter()
            .map(|role| role.data_scope)
            .collect();

        if let Some(user_override) = self.store.override_scope(principal.user_id).await? {
            if user_override.enabled {
                scopes.insert(user_override.data_scope);
            }
        }
        Ok(scopes)
    }

    pub async fn resolve_dept_filter(
        &self,
        principal: &Principal,
    ) -> Result<EffectiveDataScope, AuthError> {
        if self.admin_bypass && principal.is_admin {
            counter!("authz_admin_bypass_total", "check" => "data_scope").increment(1);
            return Ok(EffectiveDataScope::Unrestricted);
        }

        // Read the generation and epoch before computing: a concurrent move
        // or invalidation then strands the result instead of poisoning the cache.
        let generation = self.tree.generation()?;
        let Some(epoch) = self.epoch(principal.user_id).await else {
            return self.compute(principal).await;
        };
        let key = keys::scope(generation, principal.user_id);

        match cache::get_json::<CachedScope>(self.cache.as_ref(), &key).await {
            Ok(Some(cached))
                if cached.department_id == principal.department_id && cached.epoch == epoch =>
            {
                counter!("authz_scope_cache_total", "result" => "hit").increment(1);
                tracing::debug!(user_id = %principal.user_id, "Data scope cache hit");
                return Ok(cached.scope);
            }
            Ok(_) => {
                counter!("authz_scope_cache_total", "result" => "miss").increment(1);
                tracing::debug!(user_id = %principal.user_id, "Data scope cache miss");
            }
            Err(e) => {
                counter!("authz_cache_errors_total", "op" => "get").increment(1);
                tracing::warn!(
                    user_id = %principal.user_id,
                    error = %e,
                    "Data scope cache read failed, recomputing"
                );
            }
        }

        self.store_computed(principal, generation, epoch).await
    }

    /// Compute from the store and tree, skipping the cache read.
    pub async fn recalculate(&self, principal: &Principal) -> Result<EffectiveDataScope, AuthError> {
        if self.admin_bypass && principal.is_admin {
            return Ok(EffectiveDataScope::Unrestricted);
        }
        let generation = self.tree.generation()?;
        match self.epoch(principal.user_id).await {
            Some(epoch) => self.store_computed(principal, generation, epoch).await,
            None => self.compute(principal).await,
        }
    }

    async fn epoch(&self, user_id: UserId) -> Option<Option<String>> {
        match cache::current_epoch(self.cache.as_ref(), &keys::epoch(EPOCH_AREA, user_id)).await {
            Ok(epoch) => Some(epoch),
            Err(e) => {
                counter!("authz_cache_errors_total", "op" => "get").increment(1);
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Data scope epoch read failed, recomputing without caching"
                );
                None
            }
        }
    }

    async fn store_computed(
        &self,
        principal: &Principal,
        generation: u64,
        epoch: Option<String>,
    ) -> Result<EffectiveDataScope, AuthError> {
        let scope = self.compute(principal).await?;

        let entry = CachedScope {
            department_id: principal.department_id,
            epoch,
            scope: scope.clone(),
        };
        let key = keys::scope(generation, principal.user_id);
        if let Err(e) = cache::set_json(self.cache.as_ref(), &key, &entry, self.ttl_seconds).await {
            counter!("authz_cache_errors_total", "op" => "set").increment(1);
            tracing::warn!(user_id = %principal.user_id, error = %e, "Failed to cache data scope");
        }
        Ok(scope)
    }

    async fn compute(&self, principal: &Principal) -> Result<EffectiveDataScope, AuthError> {
        // An enabled override replaces role scopes outright.
        if let Some(user_override) = self.store.override_scope(principal.user_id).await? {
            if user_override.enabled {
                tracing::debug!(
                    user_id = %principal.user_id,
                    scope = user_override.data_scope.code(),
                    "Applying user data-scope override"
                );
                return self.materialize(
                    principal,
                    user_override.data_scope,
                    user_override.custom_dept_ids,
                );
            }
        }

        let roles = self.store.enabled_roles_of_user(principal.user_id).await?;
        let Some(winner) = roles.iter().map(|role| role.data_scope).max() else {
            tracing::warn!(user_id = %principal.user_id, "No enabled roles, denying all department data");
            return Ok(EffectiveDataScope::DeptSet(BTreeSet::new()));
        };

        let custom = if winner == DataScope::Custom {
            union_custom_depts(&roles)
        } else {
            BTreeSet::new()
        };
        self.materialize(principal, winner, custom)
    }

    fn materialize(
        &self,
        principal: &Principal,
        scope: DataScope,
        custom_dept_ids: BTreeSet<DeptId>,
    ) -> Result<EffectiveDataScope, AuthError> {
        let resolved = match scope {
            DataScope::All => EffectiveDataScope::Unrestricted,
            DataScope::Custom => EffectiveDataScope::DeptSet(custom_dept_ids),
            DataScope::Dept => {
                let dept = self.tree.get(principal.department_id)?;
                EffectiveDataScope::DeptSet(BTreeSet::from([dept.id]))
            }
            DataScope::DeptAndChild => {
                let dept = self.tree.get(principal.department_id)?;
                let mut ids: BTreeSet<DeptId> = self
                    .tree
                    .descendants_of(dept.id)?
                    .into_iter()
                    .map(|d| d.id)
                    .collect();
                ids.insert(dept.id);
                EffectiveDataScope::DeptSet(ids)
            }
            DataScope::SelfOnly => EffectiveDataScope::SelfOnly,
        };
        Ok(resolved)
    }

    pub async fn has_dept_data_permission(
        &self,
        principal: &Principal,
        dept_id: DeptId,
    ) -> Result<bool, AuthError> {
        Ok(self.resolve_dept_filter(principal).await?.allows_dept(dept_id))
    }

    /// Per-request context handed to query builders.
    pub async fn context(&self, principal: &Principal) -> Result<DataScopeContext, AuthError> {
        let scope = self.resolve_dept_filter(principal).await?;
        Ok(DataScopeContext::new(principal.user_id, scope))
    }

    /// Move the user's epoch on and drop the cached filter for the current
    /// tree generation. Older generations are already unreachable.
    pub async fn invalidate(&self, user_id: UserId) -> Result<(), AuthError> {
        let report = |e: anyhow::Error| {
            counter!("authz_cache_errors_total", "op" => "invalidate").increment(1);
            tracing::error!(user_id = %user_id, error = %e, "Data scope invalidation failed");
            AuthError::CacheUnavailable(e)
        };

        cache::bump_epoch(
            self.cache.as_ref(),
            &keys::epoch(EPOCH_AREA, user_id),
            self.ttl_seconds,
        )
        .await
        .map_err(report)?;
        let key = keys::scope(self.tree.generation()?, user_id);
        self.cache.delete(&key).await.map_err(report)?;

        tracing::info!(user_id = %user_id, "Invalidated cached data scope");
        Ok(())
    }
}

fn union_custom_depts(roles: &[Role]) -> BTreeSet<DeptId> {
    roles
        .iter()
        .filter(|role| role.data_scope == DataScope::Custom)
        .flat_map(|role| role.custom_dept_ids.iter().copied())
        .collect()
}
