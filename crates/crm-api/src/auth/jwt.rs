//! JWT token issuance and verification
//!
//! Implements the three-part `header.payload.signature` tokens with HMAC-SHA256
//! signing against a single process-wide secret.
//!
//! - Access tokens carry `{ userId, email, role, permissions[], iss, iat, exp }`;
//!   the permission list is a snapshot taken at issuance.
//! - Refresh tokens carry `{ userId, jti, iss, iat, exp }`; `jti` is 32 random
//!   bytes so every refresh token is unique.
//!
//! Expiry is exclusive with no leeway: a token whose `exp` equals the current
//! second is already expired.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use crm_core::AuthConfig;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Access token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    /// Subject - user ID
    pub user_id: Uuid,
    /// User's email address
    pub email: String,
    /// User's role at issuance
    pub role: String,
    /// Permission snapshot at issuance
    pub permissions: Vec<String>,
    /// Token issuer
    pub iss: String,
    /// Issued at (Unix epoch seconds)
    pub iat: u64,
    /// Expiration (Unix epoch seconds)
    pub exp: u64,
}

/// Refresh token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    /// Subject - user ID
    pub user_id: Uuid,
    /// Random token identifier
    pub jti: String,
    /// Token issuer
    pub iss: String,
    /// Issued at (Unix epoch seconds)
    pub iat: u64,
    /// Expiration (Unix epoch seconds)
    pub exp: u64,
}

/// A freshly minted refresh token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token issuance errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),

    #[error("Token lifetime of {0} seconds is out of range")]
    LifetimeOutOfRange(u64),
}

/// Why a token was not usable
///
/// Callers only care that the token is unusable; the variant is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,
}

impl TokenError {
    /// Short label for structured logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::InvalidSignature => "bad_signature",
            TokenError::Expired => "expired",
        }
    }
}

/// JWT Configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret
    pub secret: String,
    /// Access token lifetime in seconds
    pub access_expiration_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_expiration_secs: u64,
    /// Token issuer identifier
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for JwtConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            access_expiration_secs: config.access_token_ttl_secs,
            refresh_expiration_secs: config.refresh_token_ttl_secs,
            issuer: config.issuer.clone(),
        }
    }
}

/// Current Unix time in seconds
pub fn now_secs() -> Result<u64, JwtError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// `now + ttl`, refusing lifetimes that do not fit
fn expiry(now: u64, ttl: u64) -> Result<u64, JwtError> {
    now.checked_add(ttl)
        .filter(|exp| i64::try_from(*exp).is_ok())
        .ok_or(JwtError::LifetimeOutOfRange(ttl))
}

/// Generate a signed access token embedding the current permission snapshot
///
/// # Example
///
/// ```no_run
/// use crm_api::auth::jwt::{generate_access_token, JwtConfig};
/// use uuid::Uuid;
///
/// let config = JwtConfig::default();
/// let token = generate_access_token(
///     &config,
///     Uuid::new_v4(),
///     "alice@example.com",
///     "user",
///     &["customer:read".to_string()],
/// ).unwrap();
/// ```
pub fn generate_access_token(
    config: &JwtConfig,
    user_id: Uuid,
    email: &str,
    role: &str,
    permissions: &[String],
) -> Result<String, JwtError> {
    let now = now_secs()?;

    let claims = AccessClaims {
        user_id,
        email: email.to_string(),
        role: role.to_string(),
        permissions: permissions.to_vec(),
        iss: config.issuer.clone(),
        iat: now,
        exp: expiry(now, config.access_expiration_secs)?,
    };

    sign(config, &claims)
}

/// Generate a signed refresh token for a user
pub fn generate_refresh_token(
    config: &JwtConfig,
    user_id: Uuid,
) -> Result<IssuedRefreshToken, JwtError> {
    let now = now_secs()?;
    let exp = expiry(now, config.refresh_expiration_secs)?;

    let claims = RefreshClaims {
        user_id,
        jti: random_token_id(),
        iss: config.issuer.clone(),
        iat: now,
        exp,
    };

    let token = sign(config, &claims)?;
    let expires_at = i64::try_from(exp)
        .ok()
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
        .ok_or(JwtError::LifetimeOutOfRange(config.refresh_expiration_secs))?;

    Ok(IssuedRefreshToken { token, expires_at })
}

/// Verify an access token's signature and expiry
pub fn validate_access_token(config: &JwtConfig, token: &str) -> Result<AccessClaims, TokenError> {
    let now = now_secs().map_err(|_| TokenError::Expired)?;
    validate_access_token_at(config, token, now)
}

/// Verify an access token as of `now` (Unix seconds)
pub fn validate_access_token_at(
    config: &JwtConfig,
    token: &str,
    now: u64,
) -> Result<AccessClaims, TokenError> {
    let claims: AccessClaims = decode_claims(config, token)?;
    check_expiry(claims.exp, now)?;
    Ok(claims)
}

/// Verify a refresh token's signature and expiry
pub fn validate_refresh_token(
    config: &JwtConfig,
    token: &str,
) -> Result<RefreshClaims, TokenError> {
    let now = now_secs().map_err(|_| TokenError::Expired)?;
    validate_refresh_token_at(config, token, now)
}

/// Verify a refresh token as of `now` (Unix seconds)
pub fn validate_refresh_token_at(
    config: &JwtConfig,
    token: &str,
    now: u64,
) -> Result<RefreshClaims, TokenError> {
    let claims: RefreshClaims = decode_claims(config, token)?;
    check_expiry(claims.exp, now)?;
    Ok(claims)
}

/// Parse an `Authorization` header value of the form `Bearer <token>`
///
/// Returns `None` for a missing header, another scheme, or an empty or
/// whitespace-containing token.
pub fn extract_bearer(header_value: Option<&str>) -> Option<&str> {
    let (scheme, token) = header_value?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }

    Some(token)
}

fn sign<T: Serialize>(config: &JwtConfig, claims: &T) -> Result<String, JwtError> {
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;
    Ok(token)
}

fn decode_claims<T: DeserializeOwned>(config: &JwtConfig, token: &str) -> Result<T, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    // Expiry is checked by `check_expiry` with an exclusive bound
    validation.validate_exp = false;
    validation.leeway = 0;

    decode::<T>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    })
}

fn check_expiry(exp: u64, now: u64) -> Result<(), TokenError> {
    if exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(())
}

fn random_token_id() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn perms() -> Vec<String> {
        vec!["customer:read".to_string(), "task:write".to_string()]
    }

    fn signed_access(config: &JwtConfig, iat: u64, exp: u64) -> String {
        let claims = AccessClaims {
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            role: "user".to_string(),
            permissions: perms(),
            iss: config.issuer.clone(),
            iat,
            exp,
        };
        sign(config, &claims).unwrap()
    }

    #[test]
    fn test_generate_and_validate_access_token() {
        let config = JwtConfig::default();
        let user_id = Uuid::new_v4();

        let token =
            generate_access_token(&config, user_id, "alice@example.com", "user", &perms())
                .expect("Failed to generate token");
        assert_eq!(token.split('.').count(), 3);

        let claims = validate_access_token(&config, &token).expect("Failed to validate token");

        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.permissions, perms());
        assert_eq!(claims.iss, "crm-api");
        assert_eq!(claims.exp - claims.iat, config.access_expiration_secs);
    }

    #[test]
    fn test_payload_uses_wire_field_names() {
        let config = JwtConfig::default();
        let token = signed_access(&config, 1_000, 2_000);
        let payload = token.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert!(json["userId"].is_string());
        assert!(json["permissions"].is_array());
        assert_eq!(json["iat"], 1_000);
        assert_eq!(json["exp"], 2_000);
    }

    #[test]
    fn test_malformed_tokens() {
        let config = JwtConfig::default();
        assert_eq!(
            validate_access_token(&config, "invalid.token.here"),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            validate_access_token(&config, ""),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            validate_access_token(&config, "onlyonepart"),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let config1 = JwtConfig {
            secret: "secret1".to_string(),
            ..Default::default()
        };
        let config2 = JwtConfig {
            secret: "secret2".to_string(),
            ..Default::default()
        };

        let token =
            generate_access_token(&config1, Uuid::new_v4(), "a@b.c", "user", &perms()).unwrap();

        let result = validate_access_token(&config2, &token);
        assert_eq!(result, Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_wrong_issuer_is_rejected() {
        let issuer_a = JwtConfig {
            issuer: "someone-else".to_string(),
            ..Default::default()
        };
        let token =
            generate_access_token(&issuer_a, Uuid::new_v4(), "a@b.c", "user", &perms()).unwrap();

        assert!(validate_access_token(&JwtConfig::default(), &token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let config = JwtConfig::default();
        let now = now_secs().unwrap();

        // Expired 1 hour ago
        let token = signed_access(&config, now - 7200, now - 3600);

        let result = validate_access_token(&config, &token);
        assert_eq!(result, Err(TokenError::Expired));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let config = JwtConfig::default();
        let token = signed_access(&config, 1_000, 2_000);

        assert!(validate_access_token_at(&config, &token, 1_999).is_ok());
        assert_eq!(
            validate_access_token_at(&config, &token, 2_000),
            Err(TokenError::Expired)
        );
        assert_eq!(
            validate_access_token_at(&config, &token, 2_001),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let config = JwtConfig::default();
        let user_id = Uuid::new_v4();

        let issued = generate_refresh_token(&config, user_id).unwrap();
        let claims = validate_refresh_token(&config, &issued.token).unwrap();

        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.exp - claims.iat, config.refresh_expiration_secs);
        assert_eq!(issued.expires_at.timestamp() as u64, claims.exp);
    }

    #[test]
    fn test_refresh_tokens_are_unique() {
        let config = JwtConfig::default();
        let user_id = Uuid::new_v4();

        let first = generate_refresh_token(&config, user_id).unwrap();
        let second = generate_refresh_token(&config, user_id).unwrap();
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let config = JwtConfig::default();
        let user_id = Uuid::new_v4();

        let refresh = generate_refresh_token(&config, user_id).unwrap();
        assert_eq!(
            validate_access_token(&config, &refresh.token),
            Err(TokenError::Malformed)
        );

        let access = generate_access_token(&config, user_id, "a@b.c", "user", &perms()).unwrap();
        assert_eq!(
            validate_refresh_token(&config, &access),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(extract_bearer(Some("bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("Bearer   abc  ")), Some("abc"));

        assert_eq!(extract_bearer(None), None);
        assert_eq!(extract_bearer(Some("")), None);
        assert_eq!(extract_bearer(Some("Bearer")), None);
        assert_eq!(extract_bearer(Some("Bearer ")), None);
        assert_eq!(extract_bearer(Some("Basic dXNlcjpwYXNz")), None);
        assert_eq!(extract_bearer(Some("Bearer abc def")), None);
        assert_eq!(extract_bearer(Some("abc.def.ghi")), None);
    }

    #[test]
    fn test_out_of_range_lifetime_is_an_error() {
        let config = JwtConfig {
            access_expiration_secs: u64::MAX,
            refresh_expiration_secs: u64::MAX,
            ..Default::default()
        };
        let user_id = Uuid::new_v4();

        assert!(matches!(
            generate_access_token(&config, user_id, "a@b.c", "user", &perms()),
            Err(JwtError::LifetimeOutOfRange(u64::MAX))
        ));
        assert!(matches!(
            generate_refresh_token(&config, user_id),
            Err(JwtError::LifetimeOutOfRange(u64::MAX))
        ));
    }

    proptest! {
        #[test]
        fn bearer_header_yields_the_token(token in "[A-Za-z0-9_.-]{1,200}") {
            let header = format!("Bearer {token}");
            prop_assert_eq!(extract_bearer(Some(&header)), Some(token.as_str()));
        }

        #[test]
        fn access_token_valid_strictly_before_exp(
            iat in 1_000_000u64..2_000_000_000,
            ttl in 1u64..1_000_000,
            offset in 0u64..2_000_000,
        ) {
            let config = JwtConfig::default();
            let exp = iat + ttl;
            let token = signed_access(&config, iat, exp);
            let now = iat + offset;

            let result = validate_access_token_at(&config, &token, now);
            if now < exp {
                prop_assert_eq!(result.map(|c| c.exp), Ok(exp));
            } else {
                prop_assert_eq!(result, Err(TokenError::Expired));
            }
        }
    }
}
