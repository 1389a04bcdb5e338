//! In-memory [`RoleRepository`] for local wiring and tests.
//!
//! Mutations here do not invalidate anything on their own; callers go
//! through the engine's invalidation entry points after changing data.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{DeptId, MenuId, Principal, Role, RoleId, UserDataPermission, UserId};
use crate::services::RoleRepository;

#[derive(Debug, Clone, Copy)]
struct UserRow {
    department_id: DeptId,
    is_admin: bool,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserRow>,
    roles: HashMap<RoleId, Role>,
    user_roles: HashMap<UserId, BTreeSet<RoleId>>,
    direct_permissions: HashMap<UserId, BTreeSet<String>>,
    overrides: HashMap<UserId, UserDataPermission>,
    menus: HashMap<MenuId, String>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, anyhow::Error> {
        self.tables
            .read()
            .map_err(|e| anyhow::anyhow!("In-memory repository lock poisoned: {}", e))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, anyhow::Error> {
        self.tables
            .write()
            .map_err(|e| anyhow::anyhow!("In-memory repository lock poisoned: {}", e))
    }

    pub fn upsert_user(
        &self,
        user_id: UserId,
        department_id: DeptId,
        is_admin: bool,
    ) -> Result<(), anyhow::Error> {
        self.write()?.users.insert(
            user_id,
            UserRow {
                department_id,
                is_admin,
            },
        );
        Ok(())
    }

    pub fn upsert_role(&self, role: Role) -> Result<(), anyhow::Error> {
        self.write()?.roles.insert(role.id, role);
        Ok(())
    }

    pub fn remove_role(&self, role_id: RoleId) -> Result<(), anyhow::Error> {
        let mut tables = self.write()?;
        tables.roles.remove(&role_id);
        for roles in tables.user_roles.values_mut() {
            roles.remove(&role_id);
        }
        Ok(())
    }

    /// Replace the user's role assignment.
    pub fn assign_roles(
        &self,
        user_id: UserId,
        role_ids: impl IntoIterator<Item = RoleId>,
    ) -> Result<(), anyhow::Error> {
        self.write()?
            .user_roles
            .insert(user_id, role_ids.into_iter().collect());
        Ok(())
    }

    /// Replace the user's directly granted permissions.
    pub fn grant_direct<I, S>(&self, user_id: UserId, permissions: I) -> Result<(), anyhow::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write()?.direct_permissions.insert(
            user_id,
            permissions.into_iter().map(Into::into).collect(),
        );
        Ok(())
    }

    pub fn set_override(
        &self,
        user_id: UserId,
        data_permission: Option<UserDataPermission>,
    ) -> Result<(), anyhow::Error> {
        let mut tables = self.write()?;
        match data_permission {
            Some(dp) => {
                tables.overrides.insert(user_id, dp);
            }
            None => {
                tables.overrides.remove(&user_id);
            }
        }
        Ok(())
    }

    pub fn register_menu(
        &self,
        menu_id: MenuId,
        permission: impl Into<String>,
    ) -> Result<(), anyhow::Error> {
        self.write()?.menus.insert(menu_id, permission.into());
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for InMemoryRepository {
    async fn fetch_principal(&self, user_id: UserId) -> Result<Option<Principal>, anyhow::Error> {
        let tables = self.read()?;
        Ok(tables.users.get(&user_id).map(|row| Principal {
            user_id,
            department_id: row.department_id,
            role_ids: tables.user_roles.get(&user_id).cloned().unwrap_or_default(),
            is_admin: row.is_admin,
        }))
    }

    async fn fetch_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleId>, anyhow::Error> {
        Ok(self
            .read()?
            .user_roles
            .get(&user_id)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn fetch_role(&self, role_id: RoleId) -> Result<Option<Role>, anyhow::Error> {
        Ok(self.read()?.roles.get(&role_id).cloned())
    }

    async fn fetch_direct_permissions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<String>, anyhow::Error> {
        Ok(self
            .read()?
            .direct_permissions
            .get(&user_id)
            .map(|perms| perms.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_user_override_scope(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserDataPermission>, anyhow::Error> {
        Ok(self.read()?.overrides.get(&user_id).cloned())
    }

    async fn fetch_users_with_role(&self, role_id: RoleId) -> Result<Vec<UserId>, anyhow::Error> {
        let mut users: Vec<UserId> = self
            .read()?
            .user_roles
            .iter()
            .filter(|(_, roles)| roles.contains(&role_id))
            .map(|(user_id, _)| *user_id)
            .collect();
        users.sort_unstable();
        Ok(users)
    }

    async fn fetch_menu_permission(
        &self,
        menu_id: MenuId,
    ) -> Result<Option<String>, anyhow::Error> {
        Ok(self.read()?.menus.get(&menu_id).cloned())
    }
}
