//! Domain models for the authorization core.

pub mod data_scope;
pub mod department;
pub mod permission;
pub mod principal;
pub mod role;
pub mod session;

pub use data_scope::{DataScopeContext, EffectiveDataScope, UserDataPermission};
pub use department::{DeptId, DeptStatus, Department, DepartmentNode, ROOT_PARENT_ID};
pub use permission::{MenuId, PermissionSet, ALL_PERMISSION};
pub use principal::{Principal, UserId};
pub use role::{DataScope, Role, RoleId, RoleStatus, ADMIN_ROLE_KEY};
pub use session::{AccessTokenClaims, IssuedSession, RefreshRecord, SessionSnapshot};
