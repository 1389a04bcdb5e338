//! Session lifecycle: issue, verify, refresh and revoke.
//!
//! An access token is a signed JWT whose `jti` keys a cached
//! [`SessionSnapshot`]. Verification never recomputes permissions; it only
//! reads the snapshot written at issue or refresh time. Refresh tokens are
//! opaque and stored under their SHA-256 digest.

use chrono::{Duration, Utc};
use metrics::counter;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::{
    EffectiveDataScope, IssuedSession, PermissionSet, Principal, RefreshRecord, SessionSnapshot,
    UserId,
};
use crate::services::cache::{self, keys, CacheBackend};
use crate::services::{AuthError, DataScopeResolver, PermissionEngine, RoleStore, TokenService};

#[derive(Clone)]
pub struct SessionManager {
    tokens: TokenService,
    permissions: PermissionEngine,
    scopes: DataScopeResolver,
    store: RoleStore,
    cache: Arc<dyn CacheBackend>,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    rotate_refresh_tokens: bool,
}

impl SessionManager {
    pub fn new(
        tokens: TokenService,
        permissions: PermissionEngine,
        scopes: DataScopeResolver,
        store: RoleStore,
        cache: Arc<dyn CacheBackend>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            tokens,
            permissions,
            scopes,
            store,
            cache,
            access_ttl_seconds: config.access_token_ttl_seconds,
            refresh_ttl_seconds: config.refresh_token_ttl_seconds,
            rotate_refresh_tokens: config.rotate_refresh_tokens,
        }
    }

    /// Issue a session for an authenticated principal.
    pub async fn issue(&self, principal: &Principal) -> Result<IssuedSession, AuthError> {
        let permissions = self.permissions.calculate_permissions(principal).await?;
        let roles = self.permissions.role_keys(principal).await?;
        let data_scope = self.scopes.resolve_dept_filter(principal).await?;

        let (access_token, snapshot) = self
            .store_snapshot(principal, permissions, roles, data_scope)
            .await?;
        let refresh_token = self.store_refresh_token(principal.user_id).await?;

        counter!("authz_sessions_total", "event" => "issued").increment(1);
        tracing::info!(
            user_id = %principal.user_id,
            token_id = %snapshot.token_id,
            "Session issued"
        );

        Ok(self.issued(access_token, refresh_token, snapshot))
    }

    /// Return the cached snapshot for a live access token.
    pub async fn verify(&self, access_token: &str) -> Result<SessionSnapshot, AuthError> {
        let result = self.verify_inner(access_token).await;
        let outcome = match &result {
            Ok(_) => "valid",
            Err(AuthError::Expired) => "expired",
            Err(AuthError::CacheUnavailable(_)) => "cache_unavailable",
            Err(_) => "invalid",
        };
        counter!("authz_verify_total", "outcome" => outcome).increment(1);
        result
    }

    async fn verify_inner(&self, access_token: &str) -> Result<SessionSnapshot, AuthError> {
        let claims = self.tokens.decode_access_token(access_token)?;
        let user_id = TokenService::user_id_from_claims(&claims)?;

        let snapshot = cache::get_json::<SessionSnapshot>(
            self.cache.as_ref(),
            &keys::session(&claims.jti),
        )
        .await
        .map_err(|e| {
            tracing::warn!(token_id = %claims.jti, error = %e, "Session lookup failed, denying");
            AuthError::CacheUnavailable(e)
        })?
        .ok_or(AuthError::Expired)?;

        if snapshot.user_id != user_id {
            tracing::warn!(
                token_id = %claims.jti,
                claimed = %user_id,
                cached = %snapshot.user_id,
                "Token subject does not match cached session"
            );
            return Err(AuthError::Invalid("Subject mismatch".to_string()));
        }
        if snapshot.is_expired() {
            return Err(AuthError::Expired);
        }
        Ok(snapshot)
    }

    /// Exchange a refresh token for a new access snapshot, recomputing
    /// identity, permissions and data scope from current data.
    ///
    /// With rotation on, the record is consumed atomically before anything
    /// else happens, so concurrent refreshes with one token yield one session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedSession, AuthError> {
        self.tokens.check_refresh_token_format(refresh_token)?;
        let token_hash = self.tokens.hash_refresh_token(refresh_token);
        let key = keys::refresh(&token_hash);

        let lookup = if self.rotate_refresh_tokens {
            cache::take_json::<RefreshRecord>(self.cache.as_ref(), &key).await
        } else {
            cache::get_json::<RefreshRecord>(self.cache.as_ref(), &key).await
        };
        let record = lookup
            .map_err(AuthError::CacheUnavailable)?
            .ok_or(AuthError::Expired)?;
        if self.rotate_refresh_tokens {
            self.unindex_refresh(record.user_id, &token_hash).await;
        }
        if record.is_expired() {
            return Err(AuthError::Expired);
        }

        let principal = self.store.principal(record.user_id).await?;

        let permissions = self.permissions.recalculate_permissions(&principal).await?;
        let roles = self.permissions.role_keys(&principal).await?;
        let data_scope = self.scopes.recalculate(&principal).await?;

        let (access_token, snapshot) = self
            .store_snapshot(&principal, permissions, roles, data_scope)
            .await?;

        let refresh_token = if self.rotate_refresh_tokens {
            self.store_refresh_token(principal.user_id).await?
        } else {
            refresh_token.to_string()
        };

        counter!("authz_sessions_total", "event" => "refreshed").increment(1);
        tracing::info!(
            user_id = %principal.user_id,
            token_id = %snapshot.token_id,
            rotated = self.rotate_refresh_tokens,
            "Session refreshed"
        );

        Ok(self.issued(access_token, refresh_token, snapshot))
    }

    /// Logout. The snapshot is deleted immediately; an already expired token
    /// is still accepted so its entry can be cleaned up.
    pub async fn revoke(&self, access_token: &str) -> Result<(), AuthError> {
        let claims = self.tokens.decode_ignoring_expiry(access_token)?;
        let user_id = TokenService::user_id_from_claims(&claims)?;

        self.cache
            .delete(&keys::session(&claims.jti))
            .await
            .map_err(AuthError::CacheUnavailable)?;
        if let Err(e) = self
            .cache
            .index_remove(&keys::user_sessions(user_id), &claims.jti)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to update session index");
        }

        counter!("authz_sessions_total", "event" => "revoked").increment(1);
        tracing::info!(user_id = %user_id, token_id = %claims.jti, "Session revoked");
        Ok(())
    }

    /// Returns whether a live refresh token was removed.
    pub async fn revoke_refresh(&self, refresh_token: &str) -> Result<bool, AuthError> {
        self.tokens.check_refresh_token_format(refresh_token)?;
        let token_hash = self.tokens.hash_refresh_token(refresh_token);

        let record = cache::take_json::<RefreshRecord>(
            self.cache.as_ref(),
            &keys::refresh(&token_hash),
        )
        .await
        .map_err(AuthError::CacheUnavailable)?;

        match record {
            Some(record) => {
                self.unindex_refresh(record.user_id, &token_hash).await;
                tracing::info!(user_id = %record.user_id, "Refresh token revoked");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every live snapshot and refresh token of the user. Returns how
    /// many access sessions were removed.
    ///
    /// Index members are removed one by one, so a session issued meanwhile
    /// stays indexed and can still be revoked later.
    pub async fn revoke_user_sessions(&self, user_id: UserId) -> Result<usize, AuthError> {
        let sessions_key = keys::user_sessions(user_id);
        let token_ids = self
            .cache
            .index_members(&sessions_key)
            .await
            .map_err(AuthError::CacheUnavailable)?;

        let mut revoked = 0;
        for token_id in &token_ids {
            if self
                .cache
                .delete(&keys::session(token_id))
                .await
                .map_err(AuthError::CacheUnavailable)?
            {
                revoked += 1;
            }
            self.cache
                .index_remove(&sessions_key, token_id)
                .await
                .map_err(AuthError::CacheUnavailable)?;
        }

        let refresh_index = keys::user_refresh_tokens(user_id);
        let hashes = self
            .cache
            .index_members(&refresh_index)
            .await
            .map_err(AuthError::CacheUnavailable)?;
        for hash in &hashes {
            self.cache
                .delete(&keys::refresh(hash))
                .await
                .map_err(AuthError::CacheUnavailable)?;
            self.cache
                .index_remove(&refresh_index, hash)
                .await
                .map_err(AuthError::CacheUnavailable)?;
        }

        counter!("authz_sessions_total", "event" => "revoked").increment(revoked as u64);
        tracing::info!(
            user_id = %user_id,
            sessions = revoked,
            refresh_tokens = hashes.len(),
            "Revoked all user sessions"
        );
        Ok(revoked)
    }

    /// Live snapshots of the user, newest first. Stale index members are pruned.
    pub async fn active_sessions(&self, user_id: UserId) -> Result<Vec<SessionSnapshot>, AuthError> {
        let sessions_key = keys::user_sessions(user_id);
        let token_ids = self
            .cache
            .index_members(&sessions_key)
            .await
            .map_err(AuthError::CacheUnavailable)?;

        let mut live = Vec::new();
        for token_id in token_ids {
            let snapshot =
                cache::get_json::<SessionSnapshot>(self.cache.as_ref(), &keys::session(&token_id))
                    .await
                    .map_err(AuthError::CacheUnavailable)?;
            match snapshot {
                Some(snapshot) if !snapshot.is_expired() => live.push(snapshot),
                _ => {
                    if let Err(e) = self.cache.index_remove(&sessions_key, &token_id).await {
                        tracing::warn!(user_id = %user_id, error = %e, "Failed to prune session index");
                    }
                }
            }
        }

        live.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(live)
    }

    pub async fn health_check(&self) -> Result<(), AuthError> {
        self.cache.health_check().await.map_err(|e| {
            tracing::error!(backend = self.cache.backend_name(), error = %e, "Cache health check failed");
            AuthError::CacheUnavailable(e)
        })
    }

    async fn store_snapshot(
        &self,
        principal: &Principal,
        permissions: PermissionSet,
        roles: BTreeSet<String>,
        data_scope: EffectiveDataScope,
    ) -> Result<(String, SessionSnapshot), AuthError> {
        let token_id = Uuid::new_v4().to_string();
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::seconds(self.access_ttl_seconds);

        let snapshot = SessionSnapshot {
            token_id: token_id.clone(),
            user_id: principal.user_id,
            department_id: principal.department_id,
            is_admin: principal.is_admin,
            permissions,
            roles,
            data_scope,
            issued_at,
            expires_at,
        };

        let ttl = self.access_ttl_seconds as u64;
        cache::set_json(self.cache.as_ref(), &keys::session(&token_id), &snapshot, ttl)
            .await
            .map_err(|e| {
                tracing::error!(user_id = %principal.user_id, error = %e, "Failed to store session");
                AuthError::CacheUnavailable(e)
            })?;
        self.cache
            .index_add(&keys::user_sessions(principal.user_id), &token_id, ttl)
            .await
            .map_err(AuthError::CacheUnavailable)?;

        let access_token =
            self.tokens
                .issue_access_token(principal.user_id, &token_id, issued_at, expires_at)?;
        Ok((access_token, snapshot))
    }

    async fn store_refresh_token(&self, user_id: UserId) -> Result<String, AuthError> {
        let refresh_token = self.tokens.generate_refresh_token();
        let token_hash = self.tokens.hash_refresh_token(&refresh_token);
        let issued_at = Utc::now();
        let record = RefreshRecord::new(
            user_id,
            issued_at,
            issued_at + Duration::seconds(self.refresh_ttl_seconds),
        );

        let ttl = self.refresh_ttl_seconds as u64;
        cache::set_json(self.cache.as_ref(), &keys::refresh(&token_hash), &record, ttl)
            .await
            .map_err(AuthError::CacheUnavailable)?;
        self.cache
            .index_add(&keys::user_refresh_tokens(user_id), &token_hash, ttl)
            .await
            .map_err(AuthError::CacheUnavailable)?;

        Ok(refresh_token)
    }

    /// The record itself is already gone; a leftover index member is pruned
    /// by the next per-user revoke.
    async fn unindex_refresh(&self, user_id: UserId, token_hash: &str) {
        if let Err(e) = self
            .cache
            .index_remove(&keys::user_refresh_tokens(user_id), token_hash)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to update refresh index");
        }
    }

    fn issued(
        &self,
        access_token: String,
        refresh_token: String,
        snapshot: SessionSnapshot,
    ) -> IssuedSession {
        IssuedSession {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl_seconds,
            snapshot,
        }
    }
}
