//! Test helpers for authz-service integration tests.
//!
//! Builds an engine over the in-memory repository, a seeded department tree
//! and the local cache.

#![allow(dead_code)]

use async_trait::async_trait;
use authz_service::{
    config::{AuthzConfig, SessionConfig},
    models::{
        DataScope, Department, MenuId, Principal, Role, RoleId, UserDataPermission, UserId,
        ROOT_PARENT_ID,
    },
    services::{CacheBackend, DepartmentTree, InMemoryRepository, LocalCache, RoleRepository},
    AuthzEngine,
};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::Notify;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

pub const HEAD_OFFICE: i64 = 1;
pub const SALES: i64 = 2;
pub const SALES_EAST: i64 = 3;
pub const FINANCE: i64 = 4;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let mut config = test_config();
        config.common.log_level = "debug".to_string();
        authz_service::init_observability(&config);
    });
}

pub fn test_config() -> AuthzConfig {
    AuthzConfig {
        session: SessionConfig {
            token_secret: TEST_SECRET.to_string(),
            issuer: "authz-test".to_string(),
            ..SessionConfig::default()
        },
        ..AuthzConfig::default()
    }
}

/// Head office (1) -> Sales (2) -> Sales East (3); Head office (1) -> Finance (4).
pub fn seeded_tree() -> Arc<DepartmentTree> {
    let tree = DepartmentTree::new();
    tree.insert(Department::new(HEAD_OFFICE, "Head Office", 0), ROOT_PARENT_ID)
        .expect("seed head office");
    tree.insert(Department::new(SALES, "Sales", 1), HEAD_OFFICE)
        .expect("seed sales");
    tree.insert(Department::new(SALES_EAST, "Sales East", 1), SALES)
        .expect("seed sales east");
    tree.insert(Department::new(FINANCE, "Finance", 2), HEAD_OFFICE)
        .expect("seed finance");
    Arc::new(tree)
}

pub struct TestApp {
    pub engine: AuthzEngine,
    pub repo: Arc<InMemoryRepository>,
    pub gate: Arc<GatedRepository>,
    pub tree: Arc<DepartmentTree>,
    pub cache: Arc<LocalCache>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AuthzConfig) -> Self {
        init_tracing();

        let repo = Arc::new(InMemoryRepository::new());
        let tree = seeded_tree();
        let gate = Arc::new(GatedRepository::new(repo.clone()));
        let cache = Arc::new(LocalCache::new());
        let engine = AuthzEngine::new(&config, gate.clone(), tree.clone(), cache.clone())
            .expect("Failed to build engine");

        TestApp {
            engine,
            repo,
            gate,
            tree,
            cache,
        }
    }

    pub fn add_user(&self, user_id: i64, department_id: i64, is_admin: bool) {
        self.repo
            .upsert_user(user_id, department_id, is_admin)
            .expect("upsert user");
    }

    pub fn add_role(&self, role: Role) {
        self.repo.upsert_role(role).expect("upsert role");
    }

    pub fn assign(&self, user_id: i64, role_ids: &[i64]) {
        self.repo
            .assign_roles(user_id, role_ids.iter().copied())
            .expect("assign roles");
    }

    /// Role with the given permissions and data scope.
    pub fn role(id: i64, key: &str, permissions: &[&str], scope: DataScope) -> Role {
        Role::new(id, key)
            .with_permissions(permissions.iter().copied())
            .with_data_scope(scope)
    }
}

/// Cache backend whose every call fails, as an unreachable Redis would.
pub struct FailingCache;

impl FailingCache {
    fn unavailable<T>() -> Result<T, anyhow::Error> {
        Err(anyhow::anyhow!("cache unavailable"))
    }
}

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, anyhow::Error> {
        Self::unavailable()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), anyhow::Error> {
        Self::unavailable()
    }

    async fn delete(&self, _key: &str) -> Result<bool, anyhow::Error> {
        Self::unavailable()
    }

    async fn take(&self, _key: &str) -> Result<Option<String>, anyhow::Error> {
        Self::unavailable()
    }

    async fn index_add(&self, _index: &str, _member: &str, _ttl: u64) -> Result<(), anyhow::Error> {
        Self::unavailable()
    }

    async fn index_members(&self, _index: &str) -> Result<Vec<String>, anyhow::Error> {
        Self::unavailable()
    }

    async fn index_remove(&self, _index: &str, _member: &str) -> Result<(), anyhow::Error> {
        Self::unavailable()
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Self::unavailable()
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Repository call at which a [`GatedRepository`] can park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    RolesForUser,
    Role,
    DirectPermissions,
}

/// Passthrough repository that can park one call after it has read its
/// data, until the test releases it. Used to interleave a computation with
/// a concurrent mutation.
pub struct GatedRepository {
    inner: Arc<InMemoryRepository>,
    armed: Mutex<Option<Gate>>,
    parked: Notify,
    released: Notify,
}

impl GatedRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
            parked: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Park the next call that reaches `gate`.
    pub fn arm(&self, gate: Gate) {
        *self.armed.lock().unwrap() = Some(gate);
    }

    pub async fn wait_parked(&self) {
        self.parked.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn checkpoint(&self, gate: Gate) {
        let hit = {
            let mut armed = self.armed.lock().unwrap();
            if *armed == Some(gate) {
                *armed = None;
                true
            } else {
                false
            }
        };
        if hit {
            self.parked.notify_one();
            self.released.notified().await;
        }
    }
}

#[async_trait]
impl RoleRepository for GatedRepository {
    async fn fetch_principal(&self, user_id: UserId) -> Result<Option<Principal>, anyhow::Error> {
        self.inner.fetch_principal(user_id).await
    }

    async fn fetch_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleId>, anyhow::Error> {
        let roles = self.inner.fetch_roles_for_user(user_id).await;
        self.checkpoint(Gate::RolesForUser).await;
        roles
    }

    async fn fetch_role(&self, role_id: RoleId) -> Result<Option<Role>, anyhow::Error> {
        let role = self.inner.fetch_role(role_id).await;
        self.checkpoint(Gate::Role).await;
        role
    }

    async fn fetch_direct_permissions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<String>, anyhow::Error> {
        let permissions = self.inner.fetch_direct_permissions(user_id).await;
        self.checkpoint(Gate::DirectPermissions).await;
        permissions
    }

    async fn fetch_user_override_scope(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserDataPermission>, anyhow::Error> {
        self.inner.fetch_user_override_scope(user_id).await
    }

    async fn fetch_users_with_role(&self, role_id: RoleId) -> Result<Vec<UserId>, anyhow::Error> {
        self.inner.fetch_users_with_role(role_id).await
    }

    async fn fetch_menu_permission(
        &self,
        menu_id: MenuId,
    ) -> Result<Option<String>, anyhow::Error> {
        self.inner.fetch_menu_permission(menu_id).await
    }
}

/// Local cache that adds one member to an index right after that index is
/// first listed, the way a session issued concurrently would.
pub struct LateIndexCache {
    inner: LocalCache,
    late: Mutex<Option<(String, String)>>,
}

impl LateIndexCache {
    pub fn new(index_key: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            inner: LocalCache::new(),
            late: Mutex::new(Some((index_key.into(), member.into()))),
        }
    }
}

#[async_trait]
impl CacheBackend for LateIndexCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<(), anyhow::Error> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        self.inner.delete(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.inner.take(key).await
    }

    async fn index_add(&self, index: &str, member: &str, ttl: u64) -> Result<(), anyhow::Error> {
        self.inner.index_add(index, member, ttl).await
    }

    async fn index_members(&self, index: &str) -> Result<Vec<String>, anyhow::Error> {
        let members = self.inner.index_members(index).await?;
        let late = {
            let mut late = self.late.lock().unwrap();
            match late.as_ref() {
                Some((key, _)) if key == index => late.take(),
                _ => None,
            }
        };
        if let Some((key, member)) = late {
            self.inner.index_add(&key, &member, 600).await?;
        }
        Ok(members)
    }

    async fn index_remove(&self, index: &str, member: &str) -> Result<(), anyhow::Error> {
        self.inner.index_remove(index, member).await
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "late-index"
    }
}
