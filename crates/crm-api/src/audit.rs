//! Security audit logging for authentication and authorization events
//!
//! Every event is emitted on the `audit` tracing target with the full event
//! serialized as JSON in the `event` field, so it can be routed separately
//! from application logs.
//!
//! Reasons recorded here (expired vs. malformed token, unknown email vs.
//! wrong password) are for operators only and never appear in responses.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful login
    LoginSuccess {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
    },

    /// Rejected login
    LoginFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// New account created through self-registration or by an admin
    Registration {
        user_id: Uuid,
        email: String,
        role: String,
        created_by: Option<Uuid>,
    },

    /// Registration rejected
    RegistrationFailure { email: String, reason: String },

    /// Access token minted from a refresh token
    TokenRefresh { user_id: Uuid },

    /// Refresh token not accepted
    RefreshRejected {
        user_id: Option<Uuid>,
        reason: String,
    },

    /// Refresh token(s) revoked
    Logout { user_id: Uuid, all_devices: bool },

    /// Bearer token missing, malformed, badly signed, or expired
    InvalidToken {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Token verified but the user record is missing or disabled
    UserRejected { user_id: Uuid, reason: String },

    /// Authenticated but lacking the required permission or role
    AccessDenied {
        user_id: Uuid,
        role: String,
        required: String,
        ip_address: Option<String>,
    },

    /// Password changed by the account owner
    PasswordChange { user_id: Uuid },

    /// Role reassigned by an administrator
    RoleChange {
        actor_id: Uuid,
        user_id: Uuid,
        from: String,
        to: String,
    },

    /// Account enabled or disabled by an administrator
    StatusChange {
        actor_id: Uuid,
        user_id: Uuid,
        is_active: bool,
    },

    /// Account deleted by an administrator
    UserDeleted { actor_id: Uuid, user_id: Uuid },

    /// Every session of a user revoked by an administrator
    SessionsRevoked { actor_id: Uuid, user_id: Uuid },
}

impl AuditEvent {
    /// Short human-readable summary for the log line
    pub fn summary(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::Registration { .. } => "User registered",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshRejected { .. } => "Refresh token rejected",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::UserRejected { .. } => "Token user rejected",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::PasswordChange { .. } => "Password changed",
            AuditEvent::RoleChange { .. } => "Role changed",
            AuditEvent::StatusChange { .. } => "Account status changed",
            AuditEvent::UserDeleted { .. } => "User deleted",
            AuditEvent::SessionsRevoked { .. } => "Sessions revoked",
        }
    }

    /// Whether the event records a rejected attempt
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AuditEvent::LoginFailure { .. }
                | AuditEvent::RegistrationFailure { .. }
                | AuditEvent::RefreshRejected { .. }
                | AuditEvent::InvalidToken { .. }
                | AuditEvent::UserRejected { .. }
                | AuditEvent::AccessDenied { .. }
        )
    }
}

/// Log a security audit event
///
/// Successful operations log at INFO, rejections at WARN, both on the
/// `audit` target.
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    if event.is_denial() {
        warn!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    } else {
        info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    }
}

/// Extract the client IP address from proxy headers
///
/// Checks X-Forwarded-For (first hop), then X-Real-IP.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract the user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
