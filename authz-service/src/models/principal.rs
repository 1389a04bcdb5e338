//! Resolved principal - the identity handed to the engine after authentication.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::department::DeptId;
use super::role::RoleId;

/// User identifier.
pub type UserId = i64;

/// Minimal identity needed for permission and scope computation.
///
/// Owned by the caller and passed in for each computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub department_id: DeptId,
    pub role_ids: BTreeSet<RoleId>,
    pub is_admin: bool,
}

impl Principal {
    pub fn new(user_id: UserId, department_id: DeptId) -> Self {
        Self {
            user_id,
            department_id,
            role_ids: BTreeSet::new(),
            is_admin: false,
        }
    }

    pub fn with_roles(mut self, role_ids: impl IntoIterator<Item = RoleId>) -> Self {
        self.role_ids = role_ids.into_iter().collect();
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}
