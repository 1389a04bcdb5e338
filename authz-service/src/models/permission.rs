//! Permission set model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Universal permission sentinel. A set containing it grants every check.
pub const ALL_PERMISSION: &str = "*:*:*";

/// Menu identifier mapped to a permission string by the repository.
pub type MenuId = i64;

/// Set of permission strings computed for a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The universal set.
    pub fn all() -> Self {
        Self(BTreeSet::from([ALL_PERMISSION.to_string()]))
    }

    pub fn is_all(&self) -> bool {
        self.0.contains(ALL_PERMISSION)
    }

    /// Check whether `permission` is granted. Blank permissions are never granted.
    pub fn contains(&self, permission: &str) -> bool {
        if permission.trim().is_empty() {
            return false;
        }
        self.is_all() || self.0.contains(permission)
    }

    pub fn insert(&mut self, permission: impl Into<String>) -> bool {
        self.0.insert(permission.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl From<BTreeSet<String>> for PermissionSet {
    fn from(set: BTreeSet<String>) -> Self {
        Self(set)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for PermissionSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_grants_everything() {
        let all = PermissionSet::all();
        assert!(all.is_all());
        assert!(all.contains("system:user:list"));
        assert!(!all.contains(""));
    }

    #[test]
    fn test_exact_membership() {
        let set: PermissionSet = ["system:user:list", "system:user:edit"].into_iter().collect();
        assert!(set.contains("system:user:list"));
        assert!(!set.contains("system:user:remove"));
        assert!(!set.contains("   "));
    }

    #[test]
    fn test_serializes_as_array() {
        let set: PermissionSet = ["b", "a"].into_iter().collect();
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["a","b"]"#);
    }
}
