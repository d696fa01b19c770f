//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::{
    auth_middleware, require_all_permissions, require_any_permission, require_permission,
    require_role,
};
use crate::handlers::{auth, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use crm_core::UserRole;
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler));

    // Authenticated, no further requirement
    let session_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/password", put(auth::change_password_handler));

    // User administration, requirements declared per method
    let user_routes = Router::new()
        .route(
            "/users",
            get(users::list_users)
                .route_layer(middleware::from_fn(require_any_permission(&[
                    "user:read",
                    "user:write",
                ])))
                .merge(
                    post(users::create_user)
                        .route_layer(middleware::from_fn(require_permission("user:write"))),
                ),
        )
        .route(
            "/users/:id",
            get(users::get_user)
                .route_layer(middleware::from_fn(require_permission("user:read")))
                .merge(
                    delete(users::delete_user)
                        .route_layer(middleware::from_fn(require_permission("user:delete"))),
                ),
        )
        .route(
            "/users/:id/role",
            put(users::update_role)
                .route_layer(middleware::from_fn(require_permission("user:write"))),
        )
        .route(
            "/users/:id/status",
            put(users::update_status)
                .route_layer(middleware::from_fn(require_permission("user:write"))),
        )
        .route(
            "/users/:id/sessions",
            delete(users::revoke_sessions).route_layer(middleware::from_fn(
                require_all_permissions(&["user:read", "user:write"]),
            )),
        );

    let admin_routes = Router::new()
        .route("/admin/permissions", get(users::role_permissions))
        .route_layer(middleware::from_fn(require_role(&[UserRole::Admin])));

    let protected_routes = Router::new()
        .merge(session_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    // Combine routes
    Router::new().merge(public_routes).merge(protected_routes)
}
