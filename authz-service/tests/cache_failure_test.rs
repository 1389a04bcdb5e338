mod common;

use authz_service::{
    models::{DataScope, EffectiveDataScope, Principal},
    services::AuthError,
    AuthzEngine,
};
use common::{seeded_tree, test_config, FailingCache, TestApp, SALES, SALES_EAST};
use std::collections::BTreeSet;
use std::sync::Arc;

fn engine_with_failing_cache() -> (AuthzEngine, TestApp) {
    // Reuse the healthy app only for its repository and tree.
    let app = TestApp::spawn();
    app.add_role(TestApp::role(10, "editor", &["doc:edit"], DataScope::DeptAndChild));
    app.assign(7, &[10]);

    let engine = AuthzEngine::new(
        &test_config(),
        app.repo.clone(),
        seeded_tree(),
        Arc::new(FailingCache),
    )
    .unwrap();
    (engine, app)
}

#[tokio::test]
async fn test_computation_recomputes_when_cache_fails() {
    let (engine, _app) = engine_with_failing_cache();
    let principal = Principal::new(7, SALES);

    assert!(engine.has_permission(&principal, "doc:edit").await.unwrap());
    assert!(!engine.has_permission(&principal, "doc:delete").await.unwrap());
    assert_eq!(
        engine.resolve_dept_filter(&principal).await.unwrap(),
        EffectiveDataScope::DeptSet(BTreeSet::from([SALES, SALES_EAST]))
    );
}

#[tokio::test]
async fn test_sessions_fail_closed_when_cache_fails() {
    let (engine, app) = engine_with_failing_cache();
    let principal = Principal::new(7, SALES);

    let err = engine.issue(&principal).await.unwrap_err();
    assert!(matches!(err, AuthError::CacheUnavailable(_)));
    assert!(err.is_retryable());

    // A token issued elsewhere cannot be verified without the cache.
    let issued = app.engine.issue(&principal).await.unwrap();
    assert!(matches!(
        engine.verify(&issued.access_token).await,
        Err(AuthError::CacheUnavailable(_))
    ));
}

#[tokio::test]
async fn test_invalidation_failure_is_reported() {
    let (engine, _app) = engine_with_failing_cache();

    assert!(matches!(
        engine.invalidate(7).await,
        Err(AuthError::CacheUnavailable(_))
    ));
    assert!(engine.health_check().await.is_err());
    assert_eq!(engine.cache_backend(), "failing");
}
