mod common;

use authz_service::{
    models::{DataScope, EffectiveDataScope, Principal},
    services::{cache::keys, AuthError, CacheBackend, InMemoryRepository},
    AuthzEngine,
};
use common::{seeded_tree, test_config, Gate, LateIndexCache, TestApp, SALES, SALES_EAST};
use std::collections::BTreeSet;
use std::sync::Arc;

#[tokio::test]
async fn test_permissions_computed_before_invalidate_are_not_served_after() {
    let app = TestApp::spawn();
    app.add_role(TestApp::role(10, "editor", &["doc:read", "doc:edit"], DataScope::Dept));
    app.assign(7, &[10]);
    let principal = Principal::new(7, SALES);

    app.gate.arm(Gate::DirectPermissions);
    let in_flight = {
        let engine = app.engine.clone();
        let principal = principal.clone();
        tokio::spawn(async move { engine.calculate_permissions(&principal).await })
    };
    app.gate.wait_parked().await;

    // Role 10 was already read by the parked computation.
    app.add_role(TestApp::role(10, "editor", &["doc:read"], DataScope::Dept));
    app.engine.invalidate(7).await.unwrap();
    app.gate.release();

    let stale = in_flight.await.unwrap().unwrap();
    assert!(stale.contains("doc:edit"));

    let current = app.engine.calculate_permissions(&principal).await.unwrap();
    assert!(current.contains("doc:read"));
    assert!(!current.contains("doc:edit"));
    assert!(!app.engine.has_permission(&principal, "doc:edit").await.unwrap());
}

#[tokio::test]
async fn test_scope_computed_before_invalidate_is_not_served_after() {
    let app = TestApp::spawn();
    app.add_role(TestApp::role(10, "manager", &[], DataScope::DeptAndChild));
    app.assign(7, &[10]);
    let principal = Principal::new(7, SALES);

    app.gate.arm(Gate::Role);
    let in_flight = {
        let engine = app.engine.clone();
        let principal = principal.clone();
        tokio::spawn(async move { engine.resolve_dept_filter(&principal).await })
    };
    app.gate.wait_parked().await;

    app.add_role(TestApp::role(10, "manager", &[], DataScope::Dept));
    app.engine.invalidate(7).await.unwrap();
    app.gate.release();

    assert_eq!(
        in_flight.await.unwrap().unwrap(),
        EffectiveDataScope::DeptSet(BTreeSet::from([SALES, SALES_EAST]))
    );
    assert_eq!(
        app.engine.resolve_dept_filter(&principal).await.unwrap(),
        EffectiveDataScope::DeptSet(BTreeSet::from([SALES]))
    );
}

#[tokio::test]
async fn test_rotated_refresh_token_cannot_be_used_while_first_refresh_runs() {
    let app = TestApp::spawn();
    app.add_role(TestApp::role(10, "editor", &["doc:read"], DataScope::Dept));
    app.assign(7, &[10]);
    app.add_user(7, SALES, false);
    let issued = app.engine.issue(&Principal::new(7, SALES)).await.unwrap();

    app.gate.arm(Gate::RolesForUser);
    let first = {
        let engine = app.engine.clone();
        let token = issued.refresh_token.clone();
        tokio::spawn(async move { engine.refresh(&token).await })
    };
    app.gate.wait_parked().await;

    assert!(matches!(
        app.engine.refresh(&issued.refresh_token).await,
        Err(AuthError::Expired)
    ));
    app.gate.release();

    let first = first.await.unwrap().unwrap();
    assert_ne!(first.refresh_token, issued.refresh_token);
    // The original session plus exactly one refreshed session.
    assert_eq!(app.engine.sessions().active_sessions(7).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_refreshes_with_one_token_mint_one_session() {
    let app = TestApp::spawn();
    app.add_role(TestApp::role(10, "editor", &["doc:read"], DataScope::Dept));
    app.assign(7, &[10]);
    app.add_user(7, SALES, false);
    let issued = app.engine.issue(&Principal::new(7, SALES)).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = app.engine.clone();
            let token = issued.refresh_token.clone();
            tokio::spawn(async move { engine.refresh(&token).await })
        })
        .collect();

    let mut refreshed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => refreshed += 1,
            Err(e) => assert!(matches!(e, AuthError::Expired)),
        }
    }
    assert_eq!(refreshed, 1);
}

#[tokio::test]
async fn test_session_indexed_during_revoke_all_stays_revocable() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.upsert_role(TestApp::role(10, "editor", &["doc:read"], DataScope::Dept))
        .unwrap();
    repo.assign_roles(7, [10]).unwrap();

    let sessions_key = keys::user_sessions(7);
    let cache = Arc::new(LateIndexCache::new(sessions_key.clone(), "late-token"));
    let engine = AuthzEngine::new(&test_config(), repo, seeded_tree(), cache.clone()).unwrap();

    let issued = engine.issue(&Principal::new(7, SALES)).await.unwrap();
    assert_eq!(engine.revoke_user_sessions(7).await.unwrap(), 1);
    assert!(engine.verify(&issued.access_token).await.is_err());

    assert_eq!(
        cache.index_members(&sessions_key).await.unwrap(),
        vec!["late-token".to_string()]
    );
}
