//! Authentication service layer
//!
//! Business logic for registration, login, token refresh, logout, password
//! changes and administrative user management. Persistence goes through the
//! [`AuthStore`] traits so the same flows run against PostgreSQL or the
//! in-memory store.

use super::jwt::{
    generate_access_token, generate_refresh_token, validate_refresh_token, JwtConfig,
};
use super::middleware::AuthenticatedUser;
use super::models::{User, UserPublic, UserUpdate};
use super::password::{hash_password, validate_password_strength, verify_password, PasswordConfig};
use super::repository::{AuthStore, RepositoryError, SessionStore, UserStore};
use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;
use chrono::Utc;
use crm_core::UserRole;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub password: String,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request
///
/// Without a refresh token every session of the user is revoked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Password change request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    pub new_password: String,
}

/// Administrative user creation request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub password: String,
    /// One of admin, manager, user, support
    pub role: String,
}

/// Role assignment request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    pub role: String,
}

/// Account status request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub is_active: bool,
}

/// Login and registration response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Access token
    pub token: String,
    pub refresh_token: String,
    pub user: UserPublic,
}

/// Refresh response: a new access token, the refresh token is kept
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub token: String,
    pub user: UserPublic,
}

/// Plaintext behind the hash that unknown-email logins are verified against
const DUMMY_PASSWORD: &str = "dummy-password-for-unknown-accounts";

/// Authentication service
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    jwt_config: JwtConfig,
    password_config: PasswordConfig,
    /// Hash with the configured algorithm and cost, computed on first use
    dummy_hash: OnceCell<String>,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        store: Arc<dyn AuthStore>,
        jwt_config: JwtConfig,
        password_config: PasswordConfig,
    ) -> Self {
        Self {
            store,
            jwt_config,
            password_config,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Register a new account with the `user` role and open a session
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AppError> {
        request.validate()?;
        validate_password_strength(&request.password).map_err(AppError::BadRequest)?;

        let user = match self
            .create_account(request.name, &request.email, &request.password, UserRole::User)
            .await
        {
            Ok(user) => user,
            Err(e) => {
                if matches!(e, AppError::DuplicateCredential) {
                    audit_log(&AuditEvent::RegistrationFailure {
                        email: request.email.clone(),
                        reason: "duplicate_email".to_string(),
                    });
                }
                return Err(e);
            }
        };

        audit_log(&AuditEvent::Registration {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role.to_string(),
            created_by: None,
        });

        self.open_session(&user).await
    }

    /// Verify credentials and open a session
    ///
    /// Unknown email, wrong password and a disabled account all produce the
    /// same `InvalidCredential` error.
    pub async fn login(
        &self,
        request: LoginRequest,
        ip_address: Option<String>,
    ) -> Result<AuthResponse, AppError> {
        request.validate()?;

        let reject = |reason: &str| {
            audit_log(&AuditEvent::LoginFailure {
                email: request.email.clone(),
                reason: reason.to_string(),
                ip_address: ip_address.clone(),
            });
            AppError::InvalidCredential
        };

        let Some(user) = self.store.find_by_email(&request.email).await? else {
            // Same hashing work as a wrong password, so timing does not reveal the email
            let dummy = self.dummy_hash().await?;
            self.check_password(&request.password, dummy).await?;
            return Err(reject("unknown_email"));
        };

        if !self
            .check_password(&request.password, &user.password_hash)
            .await?
        {
            return Err(reject("bad_password"));
        }

        if !user.is_active {
            return Err(reject("inactive"));
        }

        let user = self
            .store
            .update(user.id, UserUpdate::last_login(Utc::now()))
            .await?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email.clone(),
            ip_address,
        });

        self.open_session(&user).await
    }

    /// Exchange a refresh token for a new access token
    ///
    /// The new access token carries the user's current role and permissions.
    pub async fn refresh(&self, request: RefreshRequest) -> Result<RefreshResponse, AppError> {
        let claims = match validate_refresh_token(&self.jwt_config, &request.refresh_token) {
            Ok(claims) => claims,
            Err(e) => {
                audit_log(&AuditEvent::RefreshRejected {
                    user_id: None,
                    reason: e.as_str().to_string(),
                });
                return Err(AppError::InvalidRefreshToken);
            }
        };

        let reject = |reason: &str| {
            audit_log(&AuditEvent::RefreshRejected {
                user_id: Some(claims.user_id),
                reason: reason.to_string(),
            });
            AppError::InvalidRefreshToken
        };

        if !self
            .store
            .is_valid_refresh_token(claims.user_id, &request.refresh_token)
            .await?
        {
            return Err(reject("not_on_file"));
        }

        let user = match self.store.find_by_id(claims.user_id).await? {
            Some(user) if user.is_active => user,
            Some(_) => return Err(reject("inactive")),
            None => return Err(reject("user_not_found")),
        };

        let token = self.access_token_for(&user)?;
        audit_log(&AuditEvent::TokenRefresh { user_id: user.id });

        Ok(RefreshResponse {
            token,
            user: user.to_public(),
        })
    }

    /// Revoke one refresh token, or all of them when none is given
    pub async fn logout(&self, user_id: Uuid, request: LogoutRequest) -> Result<(), AppError> {
        let all_devices = match request.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => {
                self.store.remove_refresh_token(user_id, token).await?;
                false
            }
            _ => {
                self.store.clear_refresh_tokens(user_id).await?;
                true
            }
        };

        audit_log(&AuditEvent::Logout {
            user_id,
            all_devices,
        });
        Ok(())
    }

    /// Current user's profile
    pub async fn me(&self, user_id: Uuid) -> Result<UserPublic, AppError> {
        self.get_user(user_id).await
    }

    /// Change the caller's password and revoke all their refresh tokens
    pub async fn change_password(
        &self,
        user_id: Uuid,
        request: ChangePasswordRequest,
    ) -> Result<(), AppError> {
        request.validate()?;
        validate_password_strength(&request.new_password).map_err(AppError::BadRequest)?;

        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        if !self
            .check_password(&request.current_password, &user.password_hash)
            .await?
        {
            return Err(AppError::BadRequest(
                "Current password is incorrect".to_string(),
            ));
        }

        let hash = self.hash(&request.new_password).await?;
        self.store
            .update(user_id, UserUpdate::password_hash(hash))
            .await?;
        self.store.clear_refresh_tokens(user_id).await?;

        audit_log(&AuditEvent::PasswordChange { user_id });
        Ok(())
    }

    /// All users, oldest first
    pub async fn list_users(&self) -> Result<Vec<UserPublic>, AppError> {
        let users = self.store.list().await?;
        Ok(users.iter().map(User::to_public).collect())
    }

    /// One user by ID
    pub async fn get_user(&self, id: Uuid) -> Result<UserPublic, AppError> {
        self.store
            .find_by_id(id)
            .await?
            .map(|user| user.to_public())
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    /// Create an account with an explicit role
    pub async fn create_user(
        &self,
        actor: &AuthenticatedUser,
        request: CreateUserRequest,
    ) -> Result<UserPublic, AppError> {
        request.validate()?;
        validate_password_strength(&request.password).map_err(AppError::BadRequest)?;
        let role = parse_role(&request.role)?;

        let user = self
            .create_account(request.name, &request.email, &request.password, role)
            .await?;

        audit_log(&AuditEvent::Registration {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role.to_string(),
            created_by: Some(actor.user_id),
        });

        Ok(user.to_public())
    }

    /// Reassign a user's role; the stored permission list follows the role
    ///
    /// Tokens already issued keep their old permission snapshot until they
    /// expire or are refreshed.
    pub async fn update_role(
        &self,
        actor: &AuthenticatedUser,
        id: Uuid,
        request: UpdateRoleRequest,
    ) -> Result<UserPublic, AppError> {
        let role = parse_role(&request.role)?;
        let previous = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        let user = self.store.update(id, UserUpdate::role(role)).await?;

        audit_log(&AuditEvent::RoleChange {
            actor_id: actor.user_id,
            user_id: id,
            from: previous.role.to_string(),
            to: user.role.to_string(),
        });

        Ok(user.to_public())
    }

    /// Enable or disable an account
    ///
    /// Disabling also revokes every refresh token of the user; their access
    /// tokens stop working at the next request because the middleware checks
    /// the active flag.
    pub async fn set_status(
        &self,
        actor: &AuthenticatedUser,
        id: Uuid,
        request: UpdateStatusRequest,
    ) -> Result<UserPublic, AppError> {
        if actor.user_id == id && !request.is_active {
            return Err(AppError::BadRequest(
                "Cannot deactivate your own account".to_string(),
            ));
        }

        let user = self
            .store
            .update(id, UserUpdate::active(request.is_active))
            .await?;

        if !user.is_active {
            self.store.clear_refresh_tokens(id).await?;
        }

        audit_log(&AuditEvent::StatusChange {
            actor_id: actor.user_id,
            user_id: id,
            is_active: user.is_active,
        });

        Ok(user.to_public())
    }

    /// Revoke every refresh token of a user
    ///
    /// Their current access token keeps working until it expires.
    pub async fn revoke_sessions(
        &self,
        actor: &AuthenticatedUser,
        id: Uuid,
    ) -> Result<(), AppError> {
        if self.store.find_by_id(id).await?.is_none() {
            return Err(AppError::NotFound("User".to_string()));
        }

        self.store.clear_refresh_tokens(id).await?;

        audit_log(&AuditEvent::SessionsRevoked {
            actor_id: actor.user_id,
            user_id: id,
        });
        Ok(())
    }

    /// Delete another user's account
    pub async fn delete_user(&self, actor: &AuthenticatedUser, id: Uuid) -> Result<(), AppError> {
        if actor.user_id == id {
            return Err(AppError::BadRequest(
                "Cannot delete your own account".to_string(),
            ));
        }

        if !self.store.delete(id).await? {
            return Err(AppError::NotFound("User".to_string()));
        }

        audit_log(&AuditEvent::UserDeleted {
            actor_id: actor.user_id,
            user_id: id,
        });
        Ok(())
    }

    async fn create_account(
        &self,
        name: String,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User, AppError> {
        if self.store.find_by_email(email).await?.is_some() {
            return Err(AppError::DuplicateCredential);
        }

        let hash = self.hash(password).await?;
        let user = self
            .store
            .insert(User::new(name.trim().to_string(), email, hash, role))
            .await?;
        Ok(user)
    }

    /// Issue an access token and a stored refresh token for the user
    async fn open_session(&self, user: &User) -> Result<AuthResponse, AppError> {
        let token = self.access_token_for(user)?;
        let refresh = generate_refresh_token(&self.jwt_config, user.id)?;

        self.store.prune_expired_refresh_tokens(user.id).await?;
        self.store
            .add_refresh_token(user.id, &refresh.token, refresh.expires_at)
            .await
            .map_err(|e| match e {
                // deleted between lookup and session creation
                RepositoryError::UserNotFound => AppError::InvalidCredential,
                other => other.into(),
            })?;

        Ok(AuthResponse {
            token,
            refresh_token: refresh.token,
            user: user.to_public(),
        })
    }

    fn access_token_for(&self, user: &User) -> Result<String, AppError> {
        Ok(generate_access_token(
            &self.jwt_config,
            user.id,
            &user.email,
            user.role.as_str(),
            &user.permissions,
        )?)
    }

    /// Hash on the blocking pool; bcrypt and Argon2 are CPU-bound
    async fn hash(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_string();
        let config = self.password_config.clone();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .map_err(|e| AppError::Internal(format!("Hashing task failed: {e}")))??;
        Ok(hash)
    }

    async fn dummy_hash(&self) -> Result<&str, AppError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await?;
        Ok(hash.as_str())
    }

    async fn check_password(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Verification task failed: {e}")))
    }
}

fn parse_role(role: &str) -> Result<UserRole, AppError> {
    UserRole::parse(role).ok_or_else(|| AppError::BadRequest(format!("Unknown role: {role}")))
}
