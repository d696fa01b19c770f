//! Data models for authentication and authorization
//!
//! - User: account record with the materialized permission snapshot
//! - RefreshTokenEntry: one stored refresh token (digest only)
//! - UserUpdate: partial update applied atomically by the store
//! - UserPublic: the user shape returned by the API

use chrono::{DateTime, Utc};
use crm_core::UserRole;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

/// Trim and lowercase an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User account model
///
/// `permissions` is always the role's permission list as of the last role
/// assignment; use [`User::assign_role`] rather than writing `role` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Unique, lowercase email address
    pub email: String,

    /// Password hash (bcrypt or Argon2id); never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub role: UserRole,

    /// Permission snapshot derived from `role`
    pub permissions: Vec<String>,

    /// Soft-disable flag
    pub is_active: bool,

    pub last_login: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new active user with permissions derived from `role`
    pub fn new(name: String, email: &str, password_hash: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            email: normalize_email(email),
            password_hash,
            role,
            permissions: role.permission_strings(),
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Change the role and re-derive the permission snapshot
    pub fn assign_role(&mut self, role: UserRole) {
        self.role = role;
        self.permissions = role.permission_strings();
    }

    /// Convert user to public representation (without the password hash)
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id.to_string(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.as_str().to_string(),
            permissions: self.permissions.clone(),
            is_active: self.is_active,
            last_login: self.last_login,
            created_at: self.created_at,
        }
    }
}

/// Public user representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Stored refresh token
///
/// Only the SHA-256 digest of the token is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenEntry {
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenEntry {
    pub fn new(token: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash: token_digest(token),
            issued_at: Utc::now(),
            expires_at,
        }
    }

    /// Whether this entry stores `token`
    pub fn matches(&self, token: &str) -> bool {
        self.token_hash == token_digest(token)
    }

    /// Expired once `now` reaches `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// SHA-256 hex digest of a token, used as its storage key
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Partial user update
///
/// Setting `role` also replaces the stored permission snapshot.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub password_hash: Option<String>,
    pub is_active: Option<bool>,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserUpdate {
    pub fn role(role: UserRole) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Default::default()
        }
    }

    pub fn password_hash(hash: String) -> Self {
        Self {
            password_hash: Some(hash),
            ..Default::default()
        }
    }

    pub fn last_login(at: DateTime<Utc>) -> Self {
        Self {
            last_login: Some(at),
            ..Default::default()
        }
    }

    /// Apply the update to a user record in place
    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = normalize_email(email);
        }
        if let Some(role) = self.role {
            user.assign_role(role);
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(active) = self.is_active {
            user.is_active = active;
        }
        if let Some(at) = self.last_login {
            user.last_login = Some(at);
        }
        user.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_core::permissions_for_role;

    #[test]
    fn test_user_creation() {
        let user = User::new(
            "Alice".to_string(),
            "  Alice@Example.COM ",
            "hash".to_string(),
            UserRole::User,
        );

        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.permissions, permissions_for_role("user"));
        assert!(user.is_active);
        assert!(user.last_login.is_none());
    }

    #[test]
    fn test_role_change_rederives_permissions() {
        let mut user = User::new("Bob".into(), "bob@example.com", "h".into(), UserRole::Admin);
        assert!(user.permissions.iter().any(|p| p == "admin:all"));

        UserUpdate::role(UserRole::Support).apply(&mut user);

        assert_eq!(user.role, UserRole::Support);
        assert_eq!(user.permissions, permissions_for_role("support"));
    }

    #[test]
    fn test_update_leaves_unset_fields() {
        let mut user = User::new("Carol".into(), "carol@example.com", "h".into(), UserRole::User);
        let update = UserUpdate {
            name: Some("Caroline".to_string()),
            email: Some("CAROLINE@example.com".to_string()),
            ..Default::default()
        };
        update.apply(&mut user);

        assert_eq!(user.name, "Caroline");
        assert_eq!(user.email, "caroline@example.com");
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.password_hash, "h");
        assert!(user.is_active);
    }

    #[test]
    fn test_user_to_public() {
        let user = User::new(
            "Test User".into(),
            "test@example.com",
            "secret_hash".into(),
            UserRole::Manager,
        );

        let public = user.to_public();
        assert_eq!(public.id, user.id.to_string());
        assert_eq!(public.role, "manager");
        assert_eq!(public.permissions, user.permissions);

        let json = serde_json::to_string(&public).unwrap();
        assert!(json.contains("\"isActive\":true"));
        assert!(!json.contains("secret_hash"));

        let raw = serde_json::to_string(&user).unwrap();
        assert!(!raw.contains("secret_hash"));
    }

    #[test]
    fn test_refresh_entry_matching_and_expiry() {
        let now = Utc::now();
        let entry = RefreshTokenEntry::new("token-a", now + chrono::Duration::days(7));

        assert!(entry.matches("token-a"));
        assert!(!entry.matches("token-b"));
        assert_ne!(entry.token_hash, "token-a");
        assert_eq!(entry.token_hash.len(), 64);

        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(entry.expires_at));
    }
}
