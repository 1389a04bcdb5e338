//! Role model - permission keys and data scope granted through role assignment.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::department::DeptId;

/// Role identifier.
pub type RoleId = i64;

/// Role key reported for principals that hold the administrative bypass.
pub const ADMIN_ROLE_KEY: &str = "admin";

/// Row-visibility scope declared by a role.
///
/// Ordering follows precedence: the greatest scope is the most permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataScope {
    /// Every row in the tenant.
    All,
    /// An explicit set of departments.
    Custom,
    /// The principal's own department.
    Dept,
    /// The principal's own department and all of its descendants.
    DeptAndChild,
    /// Only rows owned by the principal.
    #[serde(rename = "SELF")]
    SelfOnly,
}

impl DataScope {
    /// Stored scope code.
    pub fn code(&self) -> &'static str {
        match self {
            DataScope::All => "1",
            DataScope::Custom => "2",
            DataScope::Dept => "3",
            DataScope::DeptAndChild => "4",
            DataScope::SelfOnly => "5",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(DataScope::All),
            "2" => Some(DataScope::Custom),
            "3" => Some(DataScope::Dept),
            "4" => Some(DataScope::DeptAndChild),
            "5" => Some(DataScope::SelfOnly),
            _ => None,
        }
    }

    /// Rank used for most-permissive-wins resolution.
    pub fn precedence(&self) -> u8 {
        match self {
            DataScope::All => 5,
            DataScope::Custom => 4,
            DataScope::DeptAndChild => 3,
            DataScope::Dept => 2,
            DataScope::SelfOnly => 1,
        }
    }
}

impl Ord for DataScope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence().cmp(&other.precedence())
    }
}

impl PartialOrd for DataScope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Role status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    #[default]
    Enabled,
    Disabled,
}

/// Role entity. Read-only from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub key: String,
    /// Lower values take priority under the override inheritance strategy.
    pub sort_order: i32,
    pub data_scope: DataScope,
    /// Only meaningful when `data_scope` is `Custom`.
    pub custom_dept_ids: BTreeSet<DeptId>,
    pub permission_keys: BTreeSet<String>,
    pub status: RoleStatus,
}

impl Role {
    /// Create an enabled role with self-only scope and no permissions.
    pub fn new(id: RoleId, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            sort_order: 0,
            data_scope: DataScope::SelfOnly,
            custom_dept_ids: BTreeSet::new(),
            permission_keys: BTreeSet::new(),
            status: RoleStatus::Enabled,
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permission_keys = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data_scope(mut self, data_scope: DataScope) -> Self {
        self.data_scope = data_scope;
        self
    }

    pub fn with_custom_depts(mut self, dept_ids: impl IntoIterator<Item = DeptId>) -> Self {
        self.data_scope = DataScope::Custom;
        self.custom_dept_ids = dept_ids.into_iter().collect();
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.status = RoleStatus::Disabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.status == RoleStatus::Enabled
    }
}
