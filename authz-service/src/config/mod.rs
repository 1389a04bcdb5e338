use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::services::{InheritanceStrategy, MergeStrategy};

const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthzConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub cache: CacheConfig,
    pub permission: PermissionConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    pub command_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Local,
            redis_url: None,
            command_timeout_ms: 500,
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionConfig {
    /// Administrators skip role lookups and receive every permission and an
    /// unrestricted data scope.
    pub admin_bypass: bool,
    pub inheritance: InheritanceStrategy,
    pub merge: MergeStrategy,
    pub cache_ttl_seconds: u64,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            admin_bypass: true,
            inheritance: InheritanceStrategy::Additive,
            merge: MergeStrategy::Union,
            cache_ttl_seconds: 1800,
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    pub token_secret: String,
    pub issuer: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub rotate_refresh_tokens: bool,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("token_secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            issuer: "authz-service".to_string(),
            access_token_ttl_seconds: 1800,
            refresh_token_ttl_seconds: 7 * 24 * 60 * 60,
            rotate_refresh_tokens: true,
        }
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "authz-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            cache: CacheConfig::default(),
            permission: PermissionConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let service_name = get_env("SERVICE_NAME", Some("authz-service"), is_prod)?;

        let common = core_config::Config {
            log_level: get_env("LOG_LEVEL", Some(common_config.log_level.as_str()), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT")
                .ok()
                .or(common_config.otlp_endpoint),
        };

        let backend: CacheBackendKind = get_env("CACHE_BACKEND", Some("local"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let config = AuthzConfig {
            common,
            environment: environment.clone(),
            service_version: get_env(
                "SERVICE_VERSION",
                Some(env!("CARGO_PKG_VERSION")),
                is_prod,
            )?,
            cache: CacheConfig {
                backend,
                redis_url: env::var("REDIS_URL").ok(),
                command_timeout_ms: parse_env("CACHE_COMMAND_TIMEOUT_MS", "500", is_prod)?,
                sweep_interval_seconds: parse_env("CACHE_SWEEP_INTERVAL_SECONDS", "60", is_prod)?,
            },
            permission: PermissionConfig {
                admin_bypass: parse_env("ADMIN_BYPASS", "true", is_prod)?,
                inheritance: get_env("INHERITANCE_STRATEGY", Some("additive"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                merge: get_env("MERGE_STRATEGY", Some("union"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                cache_ttl_seconds: parse_env("PERMISSION_CACHE_TTL_SECONDS", "1800", is_prod)?,
            },
            session: SessionConfig {
                token_secret: get_env("TOKEN_SECRET", None, is_prod)?,
                issuer: get_env("TOKEN_ISSUER", Some(service_name.as_str()), is_prod)?,
                access_token_ttl_seconds: parse_env("ACCESS_TOKEN_TTL_SECONDS", "1800", is_prod)?,
                refresh_token_ttl_seconds: parse_env(
                    "REFRESH_TOKEN_TTL_SECONDS",
                    "604800",
                    is_prod,
                )?,
                rotate_refresh_tokens: parse_env("ROTATE_REFRESH_TOKENS", "true", is_prod)?,
            },
            service_name,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.permission.cache_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PERMISSION_CACHE_TTL_SECONDS must be positive"
            )));
        }

        if self.session.access_token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.session.refresh_token_ttl_seconds <= self.session.access_token_ttl_seconds {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_TTL_SECONDS must be longer than ACCESS_TOKEN_TTL_SECONDS"
            )));
        }

        if self.session.token_secret.len() < MIN_SECRET_BYTES {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SECRET must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }

        if self.cache.sweep_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CACHE_SWEEP_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.cache.backend == CacheBackendKind::Redis
            && self.cache.redis_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REDIS_URL is required when CACHE_BACKEND=redis"
            )));
        }

        if self.environment == Environment::Prod {
            if self.cache.backend == CacheBackendKind::Local {
                tracing::warn!(
                    "Local cache backend in production - invalidation is not shared across instances"
                );
            }

            if !self.session.rotate_refresh_tokens {
                tracing::warn!("Refresh token rotation is disabled in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(CacheBackendKind::Redis),
            "local" => Ok(CacheBackendKind::Local),
            _ => Err(format!("Invalid cache backend: {}", s)),
        }
    }
}
