/// Authentication and authorization middleware for protecting routes
///
/// Every protected request runs through the same ordered checks, each of
/// which can short-circuit with an [`AuthError`]:
///
/// 1. Bearer token present in the `Authorization` header
/// 2. Token signature, issuer and expiry
/// 3. Referenced user exists and is active (bounded by the lookup timeout)
/// 4. [`AuthenticatedUser`] attached to the request extensions
/// 5. Declared permission or role present in the token's snapshot
///
/// Step 5 reads the permissions embedded in the token, not the stored user,
/// so a role change takes effect when the token is reissued.
use super::jwt::{extract_bearer, validate_access_token, AccessClaims, TokenError};
use super::repository::UserStore;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use crm_core::{has_all, has_any, has_permission, UserRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Authenticated user information
///
/// Added to request extensions by [`auth_middleware`]; extract it in
/// handlers with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// User's unique identifier
    pub user_id: Uuid,
    /// User's email address
    pub email: String,
    /// User's display name, from the stored record
    pub name: String,
    /// Role at token issuance
    pub role: String,
    /// Permission snapshot at token issuance
    pub permissions: Vec<String>,
}

impl AuthenticatedUser {
    fn from_claims(claims: AccessClaims, name: String) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
            name,
            role: claims.role,
            permissions: claims.permissions,
        }
    }

    /// Check if user has admin role
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin.as_str()
    }

    /// Check a single permission against the token snapshot
    pub fn has_permission(&self, permission: &str) -> bool {
        has_permission(&self.permissions, permission)
    }
}

/// What a route demands of the caller beyond being authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Permission(&'static str),
    AnyPermission(&'static [&'static str]),
    AllPermissions(&'static [&'static str]),
    AnyRole(&'static [UserRole]),
}

impl Requirement {
    /// Label used in audit records
    pub fn describe(&self) -> String {
        match self {
            Requirement::Permission(p) => (*p).to_string(),
            Requirement::AnyPermission(ps) => format!("any:{}", ps.join(",")),
            Requirement::AllPermissions(ps) => format!("all:{}", ps.join(",")),
            Requirement::AnyRole(roles) => {
                let names: Vec<&str> = roles.iter().map(UserRole::as_str).collect();
                format!("roles:{}", names.join(","))
            }
        }
    }
}

/// Authentication middleware errors
///
/// Responses carry a fixed message per variant; the cause of an invalid
/// token is only logged.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(TokenError),

    #[error("User not found")]
    UserNotFound,

    #[error("User is inactive")]
    UserInactive,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("User lookup timed out")]
    LookupTimeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "MISSING_TOKEN",
                "Authentication required",
            ),
            AuthError::InvalidToken(_) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Invalid or expired token",
            ),
            AuthError::UserNotFound => {
                (StatusCode::UNAUTHORIZED, "USER_NOT_FOUND", "User not found")
            }
            AuthError::UserInactive => (
                StatusCode::UNAUTHORIZED,
                "USER_INACTIVE",
                "User account is inactive",
            ),
            AuthError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Insufficient permissions",
            ),
            AuthError::LookupTimeout => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication failed",
            ),
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Authorization lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error",
                )
            }
        };

        (status, axum::Json(ApiError::new(code, message))).into_response()
    }
}

/// Run steps 1-3 of the pipeline against a request's headers
///
/// Logs the reason for every rejection on the audit target.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, AuthError> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let Some(token) = extract_bearer(header_value) else {
        tracing::debug!("Request without usable bearer token");
        return Err(AuthError::MissingToken);
    };

    let claims = match validate_access_token(&state.jwt, token) {
        Ok(claims) => claims,
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                reason: e.as_str().to_string(),
                ip_address: extract_ip_address(headers),
                user_agent: extract_user_agent(headers),
            });
            return Err(AuthError::InvalidToken(e));
        }
    };

    let lookup = tokio::time::timeout(
        state.lookup_timeout(),
        state.store.find_by_id(claims.user_id),
    )
    .await;

    let user = match lookup {
        Err(_) => {
            tracing::warn!(user_id = %claims.user_id, "User lookup timed out");
            return Err(AuthError::LookupTimeout);
        }
        Ok(Err(e)) => return Err(AuthError::Internal(e.to_string())),
        Ok(Ok(None)) => {
            audit_log(&AuditEvent::UserRejected {
                user_id: claims.user_id,
                reason: "not_found".to_string(),
            });
            return Err(AuthError::UserNotFound);
        }
        Ok(Ok(Some(user))) => user,
    };

    if !user.is_active {
        audit_log(&AuditEvent::UserRejected {
            user_id: user.id,
            reason: "inactive".to_string(),
        });
        return Err(AuthError::UserInactive);
    }

    Ok(AuthenticatedUser::from_claims(claims, user.name))
}

/// Decide whether a principal satisfies a requirement
///
/// The admin role and the wildcard permission always pass.
pub fn authorize(user: &AuthenticatedUser, requirement: &Requirement) -> Result<(), AuthError> {
    if user.is_admin() || has_permission(&user.permissions, crm_core::WILDCARD) {
        return Ok(());
    }

    let allowed = match requirement {
        Requirement::Permission(p) => has_permission(&user.permissions, p),
        Requirement::AnyPermission(ps) => has_any(&user.permissions, *ps),
        Requirement::AllPermissions(ps) => has_all(&user.permissions, *ps),
        Requirement::AnyRole(roles) => roles.iter().any(|r| r.as_str() == user.role),
    };

    if allowed {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

/// Authentication middleware that requires a valid access token
///
/// # Usage
///
/// ```ignore
/// use axum::{Router, routing::get, middleware};
/// use crm_api::auth::middleware::auth_middleware;
///
/// let app = Router::new()
///     .route("/protected", get(protected_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let user = authenticate(&state, request.headers()).await?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Type alias for requirement middleware future
type RequirementFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>>;

/// Middleware factory enforcing a [`Requirement`]
///
/// Must be layered inside [`auth_middleware`], which supplies the
/// [`AuthenticatedUser`].
pub fn require(
    requirement: Requirement,
) -> impl Fn(Request<Body>, Next) -> RequirementFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = request
                .extensions()
                .get::<AuthenticatedUser>()
                .ok_or(AuthError::MissingToken)?
                .clone();

            if let Err(e) = authorize(&user, &requirement) {
                audit_log(&AuditEvent::AccessDenied {
                    user_id: user.user_id,
                    role: user.role.clone(),
                    required: requirement.describe(),
                    ip_address: extract_ip_address(request.headers()),
                });
                return Err(e);
            }

            Ok(next.run(request).await)
        })
    }
}

/// Require one permission
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .route("/users/:id", delete(delete_user))
///     .route_layer(middleware::from_fn(require_permission("user:delete")))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub fn require_permission(
    permission: &'static str,
) -> impl Fn(Request<Body>, Next) -> RequirementFuture + Clone {
    require(Requirement::Permission(permission))
}

/// Require at least one of several permissions
pub fn require_any_permission(
    permissions: &'static [&'static str],
) -> impl Fn(Request<Body>, Next) -> RequirementFuture + Clone {
    require(Requirement::AnyPermission(permissions))
}

/// Require every listed permission
pub fn require_all_permissions(
    permissions: &'static [&'static str],
) -> impl Fn(Request<Body>, Next) -> RequirementFuture + Clone {
    require(Requirement::AllPermissions(permissions))
}

/// Require one of several roles
pub fn require_role(
    roles: &'static [UserRole],
) -> impl Fn(Request<Body>, Next) -> RequirementFuture + Clone {
    require(Requirement::AnyRole(roles))
}
