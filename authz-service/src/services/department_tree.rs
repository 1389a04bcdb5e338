//! Department hierarchy with materialized ancestor paths.
//!
//! Every department stores the id path from the root to its parent, so
//! descendant queries are a single pass over the paths rather than a walk
//! whose cost grows with depth. Re-parenting rewrites the path prefix of the
//! moved department and every descendant under one write lock, so readers
//! never observe a half-moved subtree.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{DeptId, DeptStatus, Department, DepartmentNode, ROOT_PARENT_ID};
use crate::services::AuthError;

#[derive(Debug, Default)]
struct TreeState {
    departments: HashMap<DeptId, Department>,
    /// Bumped on every structural change; scope caches key on it.
    generation: u64,
}

impl TreeState {
    fn get(&self, dept_id: DeptId) -> Result<&Department, AuthError> {
        self.departments
            .get(&dept_id)
            .ok_or(AuthError::not_found("department", dept_id))
    }

    fn descendant_ids(&self, dept_id: DeptId) -> Vec<DeptId> {
        self.departments
            .values()
            .filter(|d| d.has_ancestor(dept_id))
            .map(|d| d.id)
            .collect()
    }

    /// Path a child of `parent_id` carries.
    fn child_path(&self, parent_id: DeptId) -> Result<Vec<DeptId>, AuthError> {
        if parent_id == ROOT_PARENT_ID {
            return Ok(Vec::new());
        }
        Ok(self.get(parent_id)?.path())
    }
}

/// In-memory department hierarchy.
#[derive(Debug, Default)]
pub struct DepartmentTree {
    state: RwLock<TreeState>,
}

impl DepartmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tree from persisted rows, verifying the ancestor invariant.
    pub fn from_departments(departments: Vec<Department>) -> Result<Self, AuthError> {
        let mut map = HashMap::with_capacity(departments.len());
        for dept in departments {
            if dept.id == ROOT_PARENT_ID {
                return Err(AuthError::Conflict(format!(
                    "department id {} is reserved",
                    ROOT_PARENT_ID
                )));
            }
            if let Some(previous) = map.insert(dept.id, dept) {
                return Err(AuthError::Conflict(format!(
                    "duplicate department id {}",
                    previous.id
                )));
            }
        }

        let state = TreeState {
            departments: map,
            generation: 0,
        };

        for dept in state.departments.values() {
            let expected = state.child_path(dept.parent_id)?;
            if dept.ancestors != expected {
                return Err(AuthError::Conflict(format!(
                    "department {} has ancestors {:?}, expected {:?}",
                    dept.id, dept.ancestors, expected
                )));
            }
        }

        tracing::info!(departments = state.departments.len(), "Department tree loaded");

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TreeState>, AuthError> {
        self.state
            .read()
            .map_err(|e| AuthError::Internal(format!("Department tree lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TreeState>, AuthError> {
        self.state
            .write()
            .map_err(|e| AuthError::Internal(format!("Department tree lock poisoned: {}", e)))
    }

    /// Structural generation. Changes whenever a descendant set may have changed.
    pub fn generation(&self) -> Result<u64, AuthError> {
        Ok(self.read()?.generation)
    }

    pub fn len(&self) -> Result<usize, AuthError> {
        Ok(self.read()?.departments.len())
    }

    pub fn is_empty(&self) -> Result<bool, AuthError> {
        Ok(self.read()?.departments.is_empty())
    }

    pub fn get(&self, dept_id: DeptId) -> Result<Department, AuthError> {
        self.read()?.get(dept_id).cloned()
    }

    pub fn contains(&self, dept_id: DeptId) -> Result<bool, AuthError> {
        Ok(self.read()?.departments.contains_key(&dept_id))
    }

    /// Insert `dept` under `parent_id` (`ROOT_PARENT_ID` for a new root).
    pub fn insert(&self, mut dept: Department, parent_id: DeptId) -> Result<Department, AuthError> {
        let mut state = self.write()?;

        if dept.id == ROOT_PARENT_ID {
            return Err(AuthError::Conflict(format!(
                "department id {} is reserved",
                ROOT_PARENT_ID
            )));
        }
        if state.departments.contains_key(&dept.id) {
            return Err(AuthError::Conflict(format!(
                "department {} already exists",
                dept.id
            )));
        }
        if parent_id != ROOT_PARENT_ID && !state.get(parent_id)?.is_enabled() {
            return Err(AuthError::Conflict(format!(
                "parent department {} is disabled",
                parent_id
            )));
        }

        dept.ancestors = state.child_path(parent_id)?;
        dept.parent_id = parent_id;

        state.departments.insert(dept.id, dept.clone());
        state.generation += 1;

        tracing::info!(dept_id = dept.id, parent_id, "Department inserted");
        Ok(dept)
    }

    /// Re-parent `dept_id` under `new_parent_id`, rewriting the ancestor
    /// prefix of the whole subtree.
    pub fn move_department(
        &self,
        dept_id: DeptId,
        new_parent_id: DeptId,
    ) -> Result<Department, AuthError> {
        let mut state = self.write()?;

        let current = state.get(dept_id)?.clone();
        if new_parent_id == dept_id {
            return Err(AuthError::Cycle {
                dept_id,
                new_parent_id,
            });
        }
        if new_parent_id != ROOT_PARENT_ID {
            let parent = state.get(new_parent_id)?;
            if parent.has_ancestor(dept_id) {
                return Err(AuthError::Cycle {
                    dept_id,
                    new_parent_id,
                });
            }
            if !parent.is_enabled() {
                return Err(AuthError::Conflict(format!(
                    "parent department {} is disabled",
                    new_parent_id
                )));
            }
        }
        if current.parent_id == new_parent_id {
            return Ok(current);
        }

        let old_prefix = current.ancestors.clone();
        let new_prefix = state.child_path(new_parent_id)?;

        // Compute every rewritten path before touching the map.
        let mut rewrites = Vec::new();
        for id in state.descendant_ids(dept_id) {
            let descendant = state.get(id)?;
            let suffix = descendant
                .ancestors
                .strip_prefix(old_prefix.as_slice())
                .ok_or_else(|| {
                    AuthError::Internal(format!(
                        "department {} path {:?} does not start with {:?}",
                        id, descendant.ancestors, old_prefix
                    ))
                })?;
            let mut path = new_prefix.clone();
            path.extend_from_slice(suffix);
            rewrites.push((id, path));
        }

        let moved = rewrites.len();
        for (id, path) in rewrites {
            if let Some(descendant) = state.departments.get_mut(&id) {
                descendant.ancestors = path;
            }
        }

        let dept = state
            .departments
            .get_mut(&dept_id)
            .ok_or(AuthError::not_found("department", dept_id))?;
        dept.parent_id = new_parent_id;
        dept.ancestors = new_prefix;
        let updated = dept.clone();

        state.generation += 1;

        tracing::info!(
            dept_id,
            old_parent_id = current.parent_id,
            new_parent_id,
            descendants_rewritten = moved,
            "Department moved"
        );
        Ok(updated)
    }

    /// All departments below `dept_id`, excluding `dept_id` itself.
    pub fn descendants_of(&self, dept_id: DeptId) -> Result<Vec<Department>, AuthError> {
        let state = self.read()?;
        state.get(dept_id)?;

        let mut descendants: Vec<Department> = state
            .departments
            .values()
            .filter(|d| d.has_ancestor(dept_id))
            .cloned()
            .collect();
        descendants.sort_by_key(|d| (d.depth(), d.order_num, d.id));
        Ok(descendants)
    }

    /// Check whether `candidate` lies strictly below `of_node`.
    pub fn is_descendant(&self, candidate: DeptId, of_node: DeptId) -> Result<bool, AuthError> {
        Ok(self.read()?.get(candidate)?.has_ancestor(of_node))
    }

    /// Root-to-parent id path of `dept_id`.
    pub fn ancestors_of(&self, dept_id: DeptId) -> Result<Vec<DeptId>, AuthError> {
        Ok(self.read()?.get(dept_id)?.ancestors.clone())
    }

    /// Direct children of `parent_id`, ordered by `order_num`.
    pub fn children_of(&self, parent_id: DeptId) -> Result<Vec<Department>, AuthError> {
        let state = self.read()?;
        if parent_id != ROOT_PARENT_ID {
            state.get(parent_id)?;
        }

        let mut children: Vec<Department> = state
            .departments
            .values()
            .filter(|d| d.parent_id == parent_id)
            .cloned()
            .collect();
        children.sort_by_key(|d| (d.order_num, d.id));
        Ok(children)
    }

    /// Remove a leaf department.
    pub fn remove(&self, dept_id: DeptId) -> Result<Department, AuthError> {
        let mut state = self.write()?;
        state.get(dept_id)?;

        if state.departments.values().any(|d| d.parent_id == dept_id) {
            return Err(AuthError::Conflict(format!(
                "department {} still has child departments",
                dept_id
            )));
        }

        let removed = state
            .departments
            .remove(&dept_id)
            .ok_or(AuthError::not_found("department", dept_id))?;
        state.generation += 1;

        tracing::info!(dept_id, "Department removed");
        Ok(removed)
    }

    /// Change status. Disabling requires every descendant to be disabled
    /// first; enabling also re-enables disabled ancestors.
    pub fn set_status(&self, dept_id: DeptId, status: DeptStatus) -> Result<(), AuthError> {
        let mut state = self.write()?;
        let ancestors = state.get(dept_id)?.ancestors.clone();

        match status {
            DeptStatus::Disabled => {
                let enabled_child = state
                    .departments
                    .values()
                    .any(|d| d.has_ancestor(dept_id) && d.is_enabled());
                if enabled_child {
                    return Err(AuthError::Conflict(format!(
                        "department {} has enabled descendants",
                        dept_id
                    )));
                }
            }
            DeptStatus::Enabled => {
                for ancestor_id in ancestors {
                    if let Some(ancestor) = state.departments.get_mut(&ancestor_id) {
                        ancestor.status = DeptStatus::Enabled;
                    }
                }
            }
        }

        if let Some(dept) = state.departments.get_mut(&dept_id) {
            dept.status = status;
        }

        tracing::info!(dept_id, status = ?status, "Department status changed");
        Ok(())
    }

    pub fn rename(&self, dept_id: DeptId, name: impl Into<String>) -> Result<(), AuthError> {
        let mut state = self.write()?;
        let dept = state
            .departments
            .get_mut(&dept_id)
            .ok_or(AuthError::not_found("department", dept_id))?;
        dept.name = name.into();
        Ok(())
    }

    /// Nested view of the whole hierarchy, siblings ordered by `order_num`.
    pub fn tree(&self) -> Result<Vec<DepartmentNode>, AuthError> {
        let state = self.read()?;

        let mut by_parent: HashMap<DeptId, Vec<&Department>> = HashMap::new();
        for dept in state.departments.values() {
            by_parent.entry(dept.parent_id).or_default().push(dept);
        }
        for siblings in by_parent.values_mut() {
            siblings.sort_by_key(|d| (d.order_num, d.id));
        }

        fn build(parent_id: DeptId, by_parent: &HashMap<DeptId, Vec<&Department>>) -> Vec<DepartmentNode> {
            by_parent
                .get(&parent_id)
                .map(|children| {
                    children
                        .iter()
                        .map(|dept| DepartmentNode {
                            department: (*dept).clone(),
                            children: build(dept.id, by_parent),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }

        Ok(build(ROOT_PARENT_ID, &by_parent))
    }
}
