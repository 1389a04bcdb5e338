use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::SessionConfig;
use crate::models::{AccessTokenClaims, UserId};
use crate::services::AuthError;

const REFRESH_TOKEN_BYTES: usize = 32;

/// Signs and validates access tokens, and mints opaque refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl TokenService {
    pub fn new(config: &SessionConfig) -> Result<Self, AuthError> {
        if config.token_secret.is_empty() {
            return Err(AuthError::Config("TOKEN_SECRET is empty".to_string()));
        }

        tracing::info!(issuer = %config.issuer, "Token service initialized with HS256 key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.token_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.token_secret.as_bytes()),
            issuer: config.issuer.clone(),
        })
    }

    pub fn issue_access_token(
        &self,
        user_id: UserId,
        token_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            jti: token_id.to_string(),
            iss: self.issuer.clone(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to encode access token: {}", e)))
    }

    /// Validate signature, issuer and expiry.
    pub fn decode_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        self.decode_with(token, true)
    }

    /// Validate signature and issuer only; used when the caller only needs
    /// the token id of a possibly expired token (logout).
    pub fn decode_ignoring_expiry(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        self.decode_with(token, false)
    }

    fn decode_with(&self, token: &str, validate_exp: bool) -> Result<AccessTokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })
    }

    /// 256 random bits, hex encoded.
    pub fn generate_refresh_token(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Refresh tokens are only ever stored as their SHA-256 digest.
    pub fn hash_refresh_token(&self, token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    pub fn check_refresh_token_format(&self, token: &str) -> Result<(), AuthError> {
        if token.len() == REFRESH_TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(())
        } else {
            Err(AuthError::Invalid("Malformed refresh token".to_string()))
        }
    }

    pub fn user_id_from_claims(claims: &AccessTokenClaims) -> Result<UserId, AuthError> {
        claims
            .sub
            .parse()
            .map_err(|_| AuthError::Invalid(format!("Invalid subject: {}", claims.sub)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn service() -> TokenService {
        TokenService::new(&SessionConfig {
            token_secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            ..SessionConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_access_token_round_trip() -> Result<(), AuthError> {
        let service = service();
        let now = Utc::now();
        let token = service.issue_access_token(42, "tok-1", now, now + Duration::minutes(5))?;

        let claims = service.decode_access_token(&token)?;
        assert_eq!(claims.jti, "tok-1");
        assert_eq!(TokenService::user_id_from_claims(&claims)?, 42);
        Ok(())
    }

    #[test]
    fn test_expired_token_is_expired_not_invalid() {
        let service = service();
        let now = Utc::now();
        let token = service
            .issue_access_token(1, "tok", now - Duration::minutes(10), now - Duration::minutes(5))
            .unwrap();

        assert!(matches!(service.decode_access_token(&token), Err(AuthError::Expired)));
        assert_eq!(service.decode_ignoring_expiry(&token).unwrap().jti, "tok");
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let service = service();
        let now = Utc::now();
        let token = service
            .issue_access_token(1, "tok", now, now + Duration::minutes(5))
            .unwrap();
        let tampered = format!("{}x", token);

        assert!(matches!(
            service.decode_access_token(&tampered),
            Err(AuthError::Invalid(_))
        ));
        assert!(matches!(
            service.decode_access_token("not-a-jwt"),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_token_from_other_secret_is_invalid() {
        let other = TokenService::new(&SessionConfig {
            token_secret: "another-secret-that-is-long-enough-too".to_string(),
            ..SessionConfig::default()
        })
        .unwrap();
        let now = Utc::now();
        let token = other
            .issue_access_token(1, "tok", now, now + Duration::minutes(5))
            .unwrap();

        assert!(matches!(
            service().decode_access_token(&token),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_refresh_tokens_are_random_and_hashed() {
        let service = service();
        let a = service.generate_refresh_token();
        let b = service.generate_refresh_token();
        assert_ne!(a, b);
        assert!(service.check_refresh_token_format(&a).is_ok());

        let hash = service.hash_refresh_token(&a);
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, a);
        assert_eq!(hash, service.hash_refresh_token(&a));

        assert!(service.check_refresh_token_format("short").is_err());
        assert!(service.check_refresh_token_format(&"z".repeat(64)).is_err());
    }
}
