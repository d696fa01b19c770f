//! CRM Core - configuration and the role/permission registry
//!
//! This crate holds the parts of the auth core that need no I/O:
//! - Configuration management (server, auth, database, logging)
//! - Permission constants, roles, and the static role→permission table
//! - Permission-check predicates

pub mod config;
pub mod rbac;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, HashAlgorithm, LoggingConfig,
    ServerConfig,
};
pub use rbac::{
    has_all, has_any, has_permission, permissions_for_role, Permission, UserRole, WILDCARD,
};
