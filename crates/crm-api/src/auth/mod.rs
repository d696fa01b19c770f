//! Authentication and authorization module
//!
//! This module provides JWT-based authentication with role-based access
//! control:
//! - Password hashing with bcrypt or Argon2id
//! - Access and refresh token issuance and validation
//! - User and refresh-token persistence (in-memory or PostgreSQL)
//! - Middleware for request authentication and permission checks
//! - Authentication service for sessions and user management

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod postgres;
pub mod repository;
pub mod service;

pub use jwt::{
    extract_bearer, generate_access_token, generate_refresh_token, validate_access_token,
    validate_refresh_token, AccessClaims, JwtConfig, RefreshClaims, TokenError,
};
pub use middleware::{
    auth_middleware, authenticate, authorize, require_all_permissions, require_any_permission,
    require_permission, require_role, AuthError, AuthenticatedUser, Requirement,
};
pub use models::{User, UserPublic, UserUpdate};
pub use password::{hash_password, validate_password_strength, verify_password, PasswordConfig};
pub use postgres::PgStore;
pub use repository::{AuthStore, MemoryStore, RepositoryError, SessionStore, UserStore};
pub use service::{
    AuthResponse, AuthService, ChangePasswordRequest, CreateUserRequest, LoginRequest,
    LogoutRequest, RefreshRequest, RefreshResponse, RegisterRequest, UpdateRoleRequest,
    UpdateStatusRequest,
};
