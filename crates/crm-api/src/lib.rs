//! CRM API - authentication and access control service
//!
//! Issues and verifies JWT sessions and gates routes by role-derived
//! permissions.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{routing::get, Json, Router};
use crm_core::config::AppConfig;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

/// OpenAPI document
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
        handlers::auth::change_password_handler,
        handlers::users::list_users,
        handlers::users::get_user,
        handlers::users::create_user,
        handlers::users::update_role,
        handlers::users::update_status,
        handlers::users::delete_user,
        handlers::users::revoke_sessions,
        handlers::users::role_permissions,
    ),
    components(schemas(
        error::ApiError,
        auth::UserPublic,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::RefreshRequest,
        auth::LogoutRequest,
        auth::ChangePasswordRequest,
        auth::CreateUserRequest,
        auth::UpdateRoleRequest,
        auth::UpdateStatusRequest,
        auth::AuthResponse,
        auth::RefreshResponse,
        handlers::auth::MessageResponse,
        handlers::health::HealthResponse,
        handlers::users::UserListResponse,
        handlers::users::RolePermissions,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Sessions and the caller's profile"),
        (name = "users", description = "User administration"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Configuration with cheap password hashing, for tests
pub fn testing_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.bcrypt_cost = 4;
    config
}

/// Router over a fresh in-memory store
pub fn create_router_for_testing() -> Router {
    create_router(Arc::new(AppState::in_memory(testing_config())))
}
