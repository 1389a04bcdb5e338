//! Department model - hierarchical organisation units with materialized ancestor paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Department identifier.
pub type DeptId = i64;

/// Parent id carried by root departments.
pub const ROOT_PARENT_ID: DeptId = 0;

/// Department status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeptStatus {
    #[default]
    Enabled,
    Disabled,
}

/// Department entity.
///
/// `ancestors` is the id path from the root down to `parent_id` (inclusive).
/// Root departments have `parent_id == ROOT_PARENT_ID` and an empty path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DeptId,
    pub parent_id: DeptId,
    pub ancestors: Vec<DeptId>,
    pub name: String,
    pub status: DeptStatus,
    pub order_num: i32,
    pub created_utc: DateTime<Utc>,
}

impl Department {
    /// Create a detached department. Parent and path are assigned on insert.
    pub fn new(id: DeptId, name: impl Into<String>, order_num: i32) -> Self {
        Self {
            id,
            parent_id: ROOT_PARENT_ID,
            ancestors: Vec::new(),
            name: name.into(),
            status: DeptStatus::Enabled,
            order_num,
            created_utc: Utc::now(),
        }
    }

    /// Check if this is a root department.
    pub fn is_root(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }

    pub fn is_enabled(&self) -> bool {
        self.status == DeptStatus::Enabled
    }

    /// Check if `dept_id` appears on this department's ancestor path.
    pub fn has_ancestor(&self, dept_id: DeptId) -> bool {
        self.ancestors.contains(&dept_id)
    }

    /// Ancestor path extended with this department's own id.
    ///
    /// This is the path every child of this department carries.
    pub fn path(&self) -> Vec<DeptId> {
        let mut path = Vec::with_capacity(self.ancestors.len() + 1);
        path.extend_from_slice(&self.ancestors);
        path.push(self.id);
        path
    }

    /// Depth below the root (roots are depth 0).
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }
}

/// Tree node with children for hierarchical views.
#[derive(Debug, Clone, Serialize)]
pub struct DepartmentNode {
    #[serde(flatten)]
    pub department: Department,
    pub children: Vec<DepartmentNode>,
}
