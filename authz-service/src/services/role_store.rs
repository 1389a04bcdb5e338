//! Read-only view over roles, assignments and overrides.
//!
//! Rows come from an external persistence collaborator through
//! [`RoleRepository`]; [`RoleStore`] turns missing references into
//! `NotFound` errors so computation never defaults to a grant.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::{
    DataScope, DeptId, MenuId, Principal, Role, RoleId, UserDataPermission, UserId,
};
use crate::services::AuthError;

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Current identity of the user: department, admin flag and role ids.
    async fn fetch_principal(&self, user_id: UserId) -> Result<Option<Principal>, anyhow::Error>;
    async fn fetch_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleId>, anyhow::Error>;
    async fn fetch_role(&self, role_id: RoleId) -> Result<Option<Role>, anyhow::Error>;
    async fn fetch_direct_permissions(&self, user_id: UserId)
        -> Result<Vec<String>, anyhow::Error>;
    async fn fetch_user_override_scope(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserDataPermission>, anyhow::Error>;
    async fn fetch_users_with_role(&self, role_id: RoleId) -> Result<Vec<UserId>, anyhow::Error>;
    async fn fetch_menu_permission(&self, menu_id: MenuId)
        -> Result<Option<String>, anyhow::Error>;

    async fn fetch_permissions_for_role(
        &self,
        role_id: RoleId,
    ) -> Result<Option<BTreeSet<String>>, anyhow::Error> {
        Ok(self.fetch_role(role_id).await?.map(|r| r.permission_keys))
    }
}

/// Lookups used by the permission engine and the data-scope resolver.
#[derive(Clone)]
pub struct RoleStore {
    repository: Arc<dyn RoleRepository>,
}

impl RoleStore {
    pub fn new(repository: Arc<dyn RoleRepository>) -> Self {
        Self { repository }
    }

    /// Identity as the repository holds it now, used wherever no caller
    /// supplies a principal (token refresh).
    pub async fn principal(&self, user_id: UserId) -> Result<Principal, AuthError> {
        self.repository
            .fetch_principal(user_id)
            .await
            .map_err(AuthError::Repository)?
            .ok_or(AuthError::not_found("user", user_id))
    }

    pub async fn roles_of_user(&self, user_id: UserId) -> Result<BTreeSet<RoleId>, AuthError> {
        let roles = self
            .repository
            .fetch_roles_for_user(user_id)
            .await
            .map_err(AuthError::Repository)?;
        Ok(roles.into_iter().collect())
    }

    pub async fn role(&self, role_id: RoleId) -> Result<Role, AuthError> {
        self.repository
            .fetch_role(role_id)
            .await
            .map_err(AuthError::Repository)?
            .ok_or(AuthError::not_found("role", role_id))
    }

    /// Enabled roles assigned to the user, fetched once per computation.
    ///
    /// An assignment pointing at a missing role is an error, not a skip.
    pub async fn enabled_roles_of_user(&self, user_id: UserId) -> Result<Vec<Role>, AuthError> {
        let mut roles = Vec::new();
        for role_id in self.roles_of_user(user_id).await? {
            let role = self.role(role_id).await?;
            if role.is_enabled() {
                roles.push(role);
            } else {
                tracing::debug!(user_id, role_id, "Skipping disabled role");
            }
        }
        Ok(roles)
    }

    pub async fn permissions_of_role(&self, role_id: RoleId) -> Result<BTreeSet<String>, AuthError> {
        self.repository
            .fetch_permissions_for_role(role_id)
            .await
            .map_err(AuthError::Repository)?
            .ok_or(AuthError::not_found("role", role_id))
    }

    pub async fn data_scope_of_role(
        &self,
        role_id: RoleId,
    ) -> Result<(DataScope, BTreeSet<DeptId>), AuthError> {
        let role = self.role(role_id).await?;
        Ok((role.data_scope, role.custom_dept_ids))
    }

    pub async fn direct_permissions(&self, user_id: UserId) -> Result<BTreeSet<String>, AuthError> {
        let permissions = self
            .repository
            .fetch_direct_permissions(user_id)
            .await
            .map_err(AuthError::Repository)?;
        Ok(permissions.into_iter().collect())
    }

    pub async fn override_scope(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserDataPermission>, AuthError> {
        self.repository
            .fetch_user_override_scope(user_id)
            .await
            .map_err(AuthError::Repository)
    }

    pub async fn users_with_role(&self, role_id: RoleId) -> Result<Vec<UserId>, AuthError> {
        self.repository
            .fetch_users_with_role(role_id)
            .await
            .map_err(AuthError::Repository)
    }

    pub async fn menu_permission(&self, menu_id: MenuId) -> Result<String, AuthError> {
        self.repository
            .fetch_menu_permission(menu_id)
            .await
            .map_err(AuthError::Repository)?
            .ok_or(AuthError::not_found("menu", menu_id))
    }

    /// Keys of the user's enabled roles.
    pub async fn role_keys_of_user(&self, user_id: UserId) -> Result<BTreeSet<String>, AuthError> {
        Ok(self
            .enabled_roles_of_user(user_id)
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect())
    }
}
