//! Services layer for authz-service.
//!
//! Department hierarchy, role lookups, permission and data-scope
//! computation, and the session lifecycle built on the pluggable cache.

pub mod cache;
mod data_scope;
mod department_tree;
pub mod error;
mod memory_repository;
mod permission;
mod role_store;
mod session;
mod token;

pub use cache::{CacheBackend, LocalCache, RedisCache};
pub use data_scope::DataScopeResolver;
pub use department_tree::DepartmentTree;
pub use error::AuthError;
pub use memory_repository::InMemoryRepository;
pub use permission::{
    Additive, InheritanceStrategy, MergeStrategy, Override, PermissionEngine,
    PermissionInheritance,
};
pub use role_store::{RoleRepository, RoleStore};
pub use session::SessionManager;
pub use token::TokenService;
