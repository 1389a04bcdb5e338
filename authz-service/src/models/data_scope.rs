//! Data-scope models - per-user overrides and the computed department filter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::department::DeptId;
use super::principal::UserId;
use super::role::DataScope;

/// Per-user data scope that replaces role-derived scopes while enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataPermission {
    pub user_id: UserId,
    pub data_scope: DataScope,
    pub custom_dept_ids: BTreeSet<DeptId>,
    pub enabled: bool,
}

impl UserDataPermission {
    pub fn new(user_id: UserId, data_scope: DataScope) -> Self {
        Self {
            user_id,
            data_scope,
            custom_dept_ids: BTreeSet::new(),
            enabled: true,
        }
    }

    pub fn with_custom_depts(mut self, dept_ids: impl IntoIterator<Item = DeptId>) -> Self {
        self.custom_dept_ids = dept_ids.into_iter().collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Department filter computed for a principal. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "dept_ids", rename_all = "snake_case")]
pub enum EffectiveDataScope {
    Unrestricted,
    SelfOnly,
    DeptSet(BTreeSet<DeptId>),
}

impl EffectiveDataScope {
    /// Department-based check. `SelfOnly` never matches a department.
    pub fn allows_dept(&self, dept_id: DeptId) -> bool {
        match self {
            EffectiveDataScope::Unrestricted => true,
            EffectiveDataScope::SelfOnly => false,
            EffectiveDataScope::DeptSet(ids) => ids.contains(&dept_id),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, EffectiveDataScope::Unrestricted)
    }

    /// Department ids when the scope is a finite set.
    pub fn dept_ids(&self) -> Option<&BTreeSet<DeptId>> {
        match self {
            EffectiveDataScope::DeptSet(ids) => Some(ids),
            _ => None,
        }
    }
}

/// Per-request data-scope context passed explicitly to data-access code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataScopeContext {
    pub user_id: UserId,
    pub scope: EffectiveDataScope,
}

impl DataScopeContext {
    pub fn new(user_id: UserId, scope: EffectiveDataScope) -> Self {
        Self { user_id, scope }
    }

    /// Decide whether a row owned by `owner_id` in `dept_id` is visible.
    pub fn permits_row(&self, dept_id: Option<DeptId>, owner_id: Option<UserId>) -> bool {
        match &self.scope {
            EffectiveDataScope::Unrestricted => true,
            EffectiveDataScope::SelfOnly => owner_id == Some(self.user_id),
            EffectiveDataScope::DeptSet(ids) => dept_id.is_some_and(|id| ids.contains(&id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_only_never_allows_departments() {
        let scope = EffectiveDataScope::SelfOnly;
        for dept_id in [-1, 0, 1, 42, i64::MAX] {
            assert!(!scope.allows_dept(dept_id));
        }
    }

    #[test]
    fn test_dept_set_membership() {
        let scope = EffectiveDataScope::DeptSet(BTreeSet::from([2, 3]));
        assert!(scope.allows_dept(2));
        assert!(!scope.allows_dept(1));
        assert_eq!(scope.dept_ids().map(|ids| ids.len()), Some(2));
    }

    #[test]
    fn test_context_row_filtering() {
        let own = DataScopeContext::new(7, EffectiveDataScope::SelfOnly);
        assert!(own.permits_row(Some(1), Some(7)));
        assert!(!own.permits_row(Some(1), Some(8)));
        assert!(!own.permits_row(Some(1), None));

        let dept = DataScopeContext::new(7, EffectiveDataScope::DeptSet(BTreeSet::from([1])));
        assert!(dept.permits_row(Some(1), Some(99)));
        assert!(!dept.permits_row(None, Some(7)));

        let all = DataScopeContext::new(7, EffectiveDataScope::Unrestricted);
        assert!(all.permits_row(None, None));
    }

    #[test]
    fn test_scope_serialization_shape() {
        let scope = EffectiveDataScope::DeptSet(BTreeSet::from([1, 2]));
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"kind":"dept_set","dept_ids":[1,2]}"#);
        let back: EffectiveDataScope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);
    }
}
