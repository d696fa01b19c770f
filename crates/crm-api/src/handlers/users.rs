//! User administration handlers
//!
//! Every route here sits behind a permission or role requirement declared in
//! [`crate::routes`].

use crate::auth::{
    AuthenticatedUser, CreateUserRequest, UpdateRoleRequest, UpdateStatusRequest, UserPublic,
};
use crate::error::AppError;
use crate::handlers::auth::MessageResponse;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use crm_core::UserRole;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// User list response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserPublic>,
    pub total: usize,
}

/// One row of the role table
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RolePermissions {
    pub role: String,
    pub permissions: Vec<String>,
}

/// List all users
#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    responses(
        (status = 200, description = "All users", body = UserListResponse),
        (status = 403, description = "Insufficient permissions", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let users = state.auth.list_users().await?;
    let total = users.len();

    Ok(Json(UserListResponse { users, total }))
}

/// Get a user by ID
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = UserPublic),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.get_user(parse_id(&id)?).await?;

    Ok(Json(user))
}

/// Create a user with an explicit role
#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserPublic),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthenticatedUser>,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.create_user(&actor, request).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Change a user's role
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/role",
    tag = "users",
    params(("id" = String, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = UserPublic),
        (status = 400, description = "Unknown role", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.update_role(&actor, parse_id(&id)?, request).await?;

    Ok(Json(user))
}

/// Activate or deactivate a user
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/status",
    tag = "users",
    params(("id" = String, Path, description = "User ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = UserPublic),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.set_status(&actor, parse_id(&id)?, request).await?;

    Ok(Json(user))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 400, description = "Cannot delete yourself", body = crate::error::ApiError),
        (status = 403, description = "Insufficient permissions", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.delete_user(&actor, parse_id(&id)?).await?;

    Ok(Json(MessageResponse::new("User deleted")))
}

/// Sign a user out everywhere by revoking all their refresh tokens
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}/sessions",
    tag = "users",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Sessions revoked", body = MessageResponse),
        (status = 403, description = "Insufficient permissions", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_sessions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.revoke_sessions(&actor, parse_id(&id)?).await?;

    Ok(Json(MessageResponse::new("Sessions revoked")))
}

/// Role to permission table
#[utoipa::path(
    get,
    path = "/api/v1/admin/permissions",
    tag = "users",
    responses(
        (status = 200, description = "Permissions per role", body = [RolePermissions]),
        (status = 403, description = "Insufficient permissions", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn role_permissions() -> impl IntoResponse {
    let table: Vec<RolePermissions> = UserRole::all()
        .iter()
        .map(|role| RolePermissions {
            role: role.to_string(),
            permissions: role.permission_strings(),
        })
        .collect();

    Json(table)
}

fn parse_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest(format!("Invalid user ID: {id}")))
}
