//! Assembly of the authorization core behind a single handle.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AuthzConfig, CacheBackendKind};
use crate::models::{
    DataScopeContext, DeptId, Department, EffectiveDataScope, IssuedSession, MenuId,
    PermissionSet, Principal, RoleId, SessionSnapshot, UserId,
};
use crate::services::{
    AuthError, CacheBackend, DataScopeResolver, DepartmentTree, LocalCache, PermissionEngine,
    RedisCache, RoleRepository, RoleStore, SessionManager, TokenService,
};

#[derive(Clone)]
pub struct AuthzEngine {
    tree: Arc<DepartmentTree>,
    store: RoleStore,
    cache: Arc<dyn CacheBackend>,
    permissions: PermissionEngine,
    scopes: DataScopeResolver,
    sessions: SessionManager,
}

impl AuthzEngine {
    /// Wire the components around an already constructed cache backend.
    pub fn new(
        config: &AuthzConfig,
        repository: Arc<dyn RoleRepository>,
        tree: Arc<DepartmentTree>,
        cache: Arc<dyn CacheBackend>,
    ) -> Result<Self, AuthError> {
        let store = RoleStore::new(repository);
        let permissions = PermissionEngine::new(store.clone(), cache.clone(), &config.permission);
        let scopes =
            DataScopeResolver::new(store.clone(), tree.clone(), cache.clone(), &config.permission);
        let sessions = SessionManager::new(
            TokenService::new(&config.session)?,
            permissions.clone(),
            scopes.clone(),
            store.clone(),
            cache.clone(),
            &config.session,
        );

        tracing::info!(
            cache_backend = cache.backend_name(),
            inheritance = permissions.inheritance_name(),
            merge = ?config.permission.merge,
            admin_bypass = config.permission.admin_bypass,
            "Authorization engine initialized"
        );

        Ok(Self {
            tree,
            store,
            cache,
            permissions,
            scopes,
            sessions,
        })
    }

    /// Validate the configuration, select the cache backend and wire the
    /// engine. The local backend gets its sweep task here.
    pub async fn from_config(
        config: &AuthzConfig,
        repository: Arc<dyn RoleRepository>,
        tree: Arc<DepartmentTree>,
    ) -> Result<Self, AuthError> {
        config
            .validate()
            .map_err(|e| AuthError::Config(e.to_string()))?;

        let cache: Arc<dyn CacheBackend> = match config.cache.backend {
            CacheBackendKind::Redis => Arc::new(
                RedisCache::new(&config.cache)
                    .await
                    .map_err(AuthError::CacheUnavailable)?,
            ),
            CacheBackendKind::Local => {
                let local = Arc::new(LocalCache::new());
                local.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_seconds));
                tracing::info!(
                    interval_seconds = config.cache.sweep_interval_seconds,
                    "Local cache sweeper started"
                );
                local
            }
        };

        Self::new(config, repository, tree, cache)
    }

    pub fn tree(&self) -> &Arc<DepartmentTree> {
        &self.tree
    }

    pub fn role_store(&self) -> &RoleStore {
        &self.store
    }

    pub fn permissions(&self) -> &PermissionEngine {
        &self.permissions
    }

    pub fn scopes(&self) -> &DataScopeResolver {
        &self.scopes
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn calculate_permissions(
        &self,
        principal: &Principal,
    ) -> Result<PermissionSet, AuthError> {
        self.permissions.calculate_permissions(principal).await
    }

    pub async fn has_permission(
        &self,
        principal: &Principal,
        permission: &str,
    ) -> Result<bool, AuthError> {
        self.permissions.has_permission(principal, permission).await
    }

    pub async fn has_menu_permission(
        &self,
        principal: &Principal,
        menu_id: MenuId,
    ) -> Result<bool, AuthError> {
        self.permissions.has_menu_permission(principal, menu_id).await
    }

    pub async fn resolve_dept_filter(
        &self,
        principal: &Principal,
    ) -> Result<EffectiveDataScope, AuthError> {
        self.scopes.resolve_dept_filter(principal).await
    }

    pub async fn has_dept_data_permission(
        &self,
        principal: &Principal,
        dept_id: DeptId,
    ) -> Result<bool, AuthError> {
        self.scopes.has_dept_data_permission(principal, dept_id).await
    }

    pub async fn data_scope_context(
        &self,
        principal: &Principal,
    ) -> Result<DataScopeContext, AuthError> {
        self.scopes.context(principal).await
    }

    pub async fn issue(&self, principal: &Principal) -> Result<IssuedSession, AuthError> {
        self.sessions.issue(principal).await
    }

    pub async fn verify(&self, access_token: &str) -> Result<SessionSnapshot, AuthError> {
        self.sessions.verify(access_token).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedSession, AuthError> {
        self.sessions.refresh(refresh_token).await
    }

    pub async fn revoke(&self, access_token: &str) -> Result<(), AuthError> {
        self.sessions.revoke(access_token).await
    }

    /// Drop the user's computed permissions and data scope. Live sessions
    /// keep their snapshot until they expire or are revoked.
    pub async fn invalidate(&self, user_id: UserId) -> Result<(), AuthError> {
        self.permissions.invalidate(user_id).await?;
        self.scopes.invalidate(user_id).await
    }

    /// Invalidate every holder of a role after its permissions or scope changed.
    pub async fn invalidate_role(&self, role_id: RoleId) -> Result<Vec<UserId>, AuthError> {
        let users = self.permissions.invalidate_role(role_id).await?;
        for user_id in &users {
            self.scopes.invalidate(*user_id).await?;
        }
        Ok(users)
    }

    pub async fn revoke_user_sessions(&self, user_id: UserId) -> Result<usize, AuthError> {
        self.sessions.revoke_user_sessions(user_id).await
    }

    /// Re-parent a department. Cached scopes become unreachable through the
    /// tree generation bump.
    pub fn move_department(
        &self,
        dept_id: DeptId,
        new_parent_id: DeptId,
    ) -> Result<Department, AuthError> {
        self.tree.move_department(dept_id, new_parent_id)
    }

    pub async fn health_check(&self) -> Result<(), AuthError> {
        self.sessions.health_check().await
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.backend_name()
    }
}
