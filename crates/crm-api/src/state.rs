//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::jwt::JwtConfig;
use crate::auth::password::PasswordConfig;
use crate::auth::repository::{AuthStore, MemoryStore};
use crate::auth::service::AuthService;
use crm_core::config::AppConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across handlers
///
/// Built once at startup and never mutated afterwards.
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Token signing settings derived from `config.auth`
    pub jwt: JwtConfig,
    /// Registration, login and user management
    pub auth: AuthService,
    /// User and session persistence
    pub store: Arc<dyn AuthStore>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create application state over the given store
    pub fn new(config: AppConfig, store: Arc<dyn AuthStore>) -> Self {
        let jwt = JwtConfig::from(&config.auth);
        let password = PasswordConfig::from(&config.auth);
        let auth = AuthService::new(store.clone(), jwt.clone(), password);

        Self {
            config,
            jwt,
            auth,
            store,
            start_time: Instant::now(),
        }
    }

    /// Application state backed by a fresh in-memory store
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Upper bound on the user lookup in the authorization path
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.config.auth.lookup_timeout_ms)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
