//! Permission registry
//!
//! Permissions are immutable `resource:action` strings. Roles map to a fixed,
//! ordered list of permissions; users never hold ad hoc grants, only the
//! snapshot derived from their role when it was last assigned.
//!
//! Everything here is pure and static: no I/O, no runtime mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The permission that satisfies every permission check.
pub const WILDCARD: &str = "admin:all";

// ============================================================================
// Permissions
// ============================================================================

/// Fine-grained capabilities, grouped by resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    // Customers
    #[serde(rename = "customer:read")]
    CustomerRead,
    #[serde(rename = "customer:write")]
    CustomerWrite,
    #[serde(rename = "customer:delete")]
    CustomerDelete,

    // Invoices
    #[serde(rename = "invoice:read")]
    InvoiceRead,
    #[serde(rename = "invoice:write")]
    InvoiceWrite,
    #[serde(rename = "invoice:delete")]
    InvoiceDelete,

    // Tasks
    #[serde(rename = "task:read")]
    TaskRead,
    #[serde(rename = "task:write")]
    TaskWrite,
    #[serde(rename = "task:delete")]
    TaskDelete,

    // Tickets
    #[serde(rename = "ticket:read")]
    TicketRead,
    #[serde(rename = "ticket:write")]
    TicketWrite,
    #[serde(rename = "ticket:delete")]
    TicketDelete,

    // Users
    #[serde(rename = "user:read")]
    UserRead,
    #[serde(rename = "user:write")]
    UserWrite,
    #[serde(rename = "user:delete")]
    UserDelete,

    // Webhooks
    #[serde(rename = "webhook:read")]
    WebhookRead,
    #[serde(rename = "webhook:write")]
    WebhookWrite,
    #[serde(rename = "webhook:delete")]
    WebhookDelete,

    /// Bypasses every permission check
    #[serde(rename = "admin:all")]
    AdminAll,
}

impl Permission {
    /// Returns the permission name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CustomerRead => "customer:read",
            Permission::CustomerWrite => "customer:write",
            Permission::CustomerDelete => "customer:delete",
            Permission::InvoiceRead => "invoice:read",
            Permission::InvoiceWrite => "invoice:write",
            Permission::InvoiceDelete => "invoice:delete",
            Permission::TaskRead => "task:read",
            Permission::TaskWrite => "task:write",
            Permission::TaskDelete => "task:delete",
            Permission::TicketRead => "ticket:read",
            Permission::TicketWrite => "ticket:write",
            Permission::TicketDelete => "ticket:delete",
            Permission::UserRead => "user:read",
            Permission::UserWrite => "user:write",
            Permission::UserDelete => "user:delete",
            Permission::WebhookRead => "webhook:read",
            Permission::WebhookWrite => "webhook:write",
            Permission::WebhookDelete => "webhook:delete",
            Permission::AdminAll => WILDCARD,
        }
    }

    /// Parses a permission from its `resource:action` form.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.as_str() == s)
    }

    /// Returns all known permissions.
    pub fn all() -> &'static [Permission] {
        &[
            Permission::CustomerRead,
            Permission::CustomerWrite,
            Permission::CustomerDelete,
            Permission::InvoiceRead,
            Permission::InvoiceWrite,
            Permission::InvoiceDelete,
            Permission::TaskRead,
            Permission::TaskWrite,
            Permission::TaskDelete,
            Permission::TicketRead,
            Permission::TicketWrite,
            Permission::TicketDelete,
            Permission::UserRead,
            Permission::UserWrite,
            Permission::UserDelete,
            Permission::WebhookRead,
            Permission::WebhookWrite,
            Permission::WebhookDelete,
            Permission::AdminAll,
        ]
    }

    /// Returns the resource part of the permission (`customer`, `invoice`, ...).
    pub fn resource(&self) -> &'static str {
        self.as_str().split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Roles
// ============================================================================

/// User role enum
///
/// - Admin: everything, including the wildcard
/// - Manager: full business-entity access, read-only user directory
/// - User: day-to-day sales work on customers, tasks, and tickets
/// - Support: ticket handling with read access to customers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    User,
    Support,
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::AdminAll,
    Permission::CustomerRead,
    Permission::CustomerWrite,
    Permission::CustomerDelete,
    Permission::InvoiceRead,
    Permission::InvoiceWrite,
    Permission::InvoiceDelete,
    Permission::TaskRead,
    Permission::TaskWrite,
    Permission::TaskDelete,
    Permission::TicketRead,
    Permission::TicketWrite,
    Permission::TicketDelete,
    Permission::UserRead,
    Permission::UserWrite,
    Permission::UserDelete,
    Permission::WebhookRead,
    Permission::WebhookWrite,
    Permission::WebhookDelete,
];

const MANAGER_PERMISSIONS: &[Permission] = &[
    Permission::CustomerRead,
    Permission::CustomerWrite,
    Permission::CustomerDelete,
    Permission::InvoiceRead,
    Permission::InvoiceWrite,
    Permission::InvoiceDelete,
    Permission::TaskRead,
    Permission::TaskWrite,
    Permission::TaskDelete,
    Permission::TicketRead,
    Permission::TicketWrite,
    Permission::TicketDelete,
    Permission::UserRead,
    Permission::WebhookRead,
    Permission::WebhookWrite,
];

const USER_PERMISSIONS: &[Permission] = &[
    Permission::CustomerRead,
    Permission::CustomerWrite,
    Permission::InvoiceRead,
    Permission::TaskRead,
    Permission::TaskWrite,
    Permission::TicketRead,
    Permission::TicketWrite,
];

const SUPPORT_PERMISSIONS: &[Permission] = &[
    Permission::CustomerRead,
    Permission::TaskRead,
    Permission::TicketRead,
    Permission::TicketWrite,
];

impl UserRole {
    /// Convert role to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::User => "user",
            UserRole::Support => "support",
        }
    }

    /// Parse role from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "manager" => Some(UserRole::Manager),
            "user" => Some(UserRole::User),
            "support" => Some(UserRole::Support),
            _ => None,
        }
    }

    /// Every role in the fixed enumeration
    pub fn all() -> &'static [UserRole] {
        &[
            UserRole::Admin,
            UserRole::Manager,
            UserRole::User,
            UserRole::Support,
        ]
    }

    /// The ordered permission list granted to this role
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            UserRole::Admin => ADMIN_PERMISSIONS,
            UserRole::Manager => MANAGER_PERMISSIONS,
            UserRole::User => USER_PERMISSIONS,
            UserRole::Support => SUPPORT_PERMISSIONS,
        }
    }

    /// The permission list as owned strings, in table order
    pub fn permission_strings(&self) -> Vec<String> {
        self.permissions()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect()
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownRole(s.to_string()))
    }
}

// ============================================================================
// Permission checks
// ============================================================================

/// Permissions granted to a role name.
///
/// Unknown roles get an empty list (default deny).
pub fn permissions_for_role(role: &str) -> Vec<String> {
    UserRole::parse(role)
        .map(|r| r.permission_strings())
        .unwrap_or_default()
}

/// True iff `required` is granted, or the wildcard is.
pub fn has_permission<S: AsRef<str>>(granted: &[S], required: &str) -> bool {
    granted
        .iter()
        .any(|p| p.as_ref() == required || p.as_ref() == WILDCARD)
}

/// True iff at least one of `required` is granted. An empty list grants nothing.
pub fn has_any<S: AsRef<str>, R: AsRef<str>>(granted: &[S], required: &[R]) -> bool {
    required
        .iter()
        .any(|r| has_permission(granted, r.as_ref()))
}

/// True iff every one of `required` is granted.
pub fn has_all<S: AsRef<str>, R: AsRef<str>>(granted: &[S], required: &[R]) -> bool {
    required
        .iter()
        .all(|r| has_permission(granted, r.as_ref()))
}
