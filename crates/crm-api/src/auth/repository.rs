//! Persistence layer for users and refresh-token sessions
//!
//! Two narrow interfaces sit between the auth core and the document store:
//! - [`UserStore`]: find/insert/update/delete user records
//! - [`SessionStore`]: the per-user refresh-token list
//!
//! Each operation is a single atomic update of one user's data, so a
//! refresh-token check can never observe a half-applied logout. Nothing
//! locks across users.
//!
//! [`MemoryStore`] keeps user documents in process; `PgStore` in
//! [`super::postgres`] backs the same traits with PostgreSQL.

use super::models::{normalize_email, RefreshTokenEntry, User, UserUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

/// User record persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Find a user by email (normalized before lookup)
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// Insert a new user; fails with `EmailAlreadyExists` on collision
    async fn insert(&self, user: User) -> Result<User, RepositoryError>;

    /// Apply a partial update and return the updated record
    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<User, RepositoryError>;

    /// Delete a user and their sessions; returns whether a record existed
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// All users, oldest first
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
}

/// Refresh-token list attached to each user
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append a refresh token to the user's list
    async fn add_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// True iff the token is on file for the user and not yet expired
    async fn is_valid_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<bool, RepositoryError>;

    /// Remove one token (single-device logout); returns whether it was present
    async fn remove_refresh_token(&self, user_id: Uuid, token: &str)
        -> Result<bool, RepositoryError>;

    /// Remove every token for the user (all-device logout); idempotent
    async fn clear_refresh_tokens(&self, user_id: Uuid) -> Result<(), RepositoryError>;

    /// Drop expired entries from the user's list; returns how many were removed
    async fn prune_expired_refresh_tokens(&self, user_id: Uuid) -> Result<usize, RepositoryError>;
}

/// Everything the auth core needs from persistence
pub trait AuthStore: UserStore + SessionStore {}

impl<T: UserStore + SessionStore> AuthStore for T {}

/// A user record together with its refresh-token list
#[derive(Debug, Clone)]
struct UserDocument {
    user: User,
    refresh_tokens: Vec<RefreshTokenEntry>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    users: HashMap<Uuid, UserDocument>,
    emails: HashMap<String, Uuid>,
}

/// In-process document store
///
/// Every mutation holds the write lock for the duration of one document
/// update, which gives the same per-document atomicity as the database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refresh tokens on file for a user (expired ones included)
    pub async fn refresh_token_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .users
            .get(&user_id)
            .map(|doc| doc.refresh_tokens.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&id).map(|doc| doc.user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .emails
            .get(&normalize_email(email))
            .and_then(|id| inner.users.get(id))
            .map(|doc| doc.user.clone()))
    }

    async fn insert(&self, mut user: User) -> Result<User, RepositoryError> {
        user.email = normalize_email(&user.email);

        let mut inner = self.inner.write().await;
        if inner.emails.contains_key(&user.email) {
            return Err(RepositoryError::EmailAlreadyExists);
        }

        inner.emails.insert(user.email.clone(), user.id);
        inner.users.insert(
            user.id,
            UserDocument {
                user: user.clone(),
                refresh_tokens: Vec::new(),
            },
        );
        Ok(user)
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<User, RepositoryError> {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;

        let doc = inner
            .users
            .get_mut(&id)
            .ok_or(RepositoryError::UserNotFound)?;
        let old_email = doc.user.email.clone();

        if let Some(email) = &update.email {
            let email = normalize_email(email);
            if email != old_email && inner.emails.contains_key(&email) {
                return Err(RepositoryError::EmailAlreadyExists);
            }
        }

        update.apply(&mut doc.user);

        if doc.user.email != old_email {
            inner.emails.remove(&old_email);
            inner.emails.insert(doc.user.email.clone(), id);
        }

        Ok(doc.user.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        match inner.users.remove(&id) {
            Some(doc) => {
                inner.emails.remove(&doc.user.email);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner.users.values().map(|doc| doc.user.clone()).collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn add_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let doc = inner
            .users
            .get_mut(&user_id)
            .ok_or(RepositoryError::UserNotFound)?;
        doc.refresh_tokens
            .push(RefreshTokenEntry::new(token, expires_at));
        Ok(())
    }

    async fn is_valid_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .get(&user_id)
            .map(|doc| {
                doc.refresh_tokens
                    .iter()
                    .any(|entry| entry.matches(token) && !entry.is_expired_at(now))
            })
            .unwrap_or(false))
    }

    async fn remove_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        let Some(doc) = inner.users.get_mut(&user_id) else {
            return Ok(false);
        };

        let before = doc.refresh_tokens.len();
        doc.refresh_tokens.retain(|entry| !entry.matches(token));
        Ok(doc.refresh_tokens.len() < before)
    }

    async fn clear_refresh_tokens(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if let Some(doc) = inner.users.get_mut(&user_id) {
            doc.refresh_tokens.clear();
        }
        Ok(())
    }

    async fn prune_expired_refresh_tokens(&self, user_id: Uuid) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let Some(doc) = inner.users.get_mut(&user_id) else {
            return Ok(0);
        };

        let before = doc.refresh_tokens.len();
        doc.refresh_tokens.retain(|entry| !entry.is_expired_at(now));
        Ok(before - doc.refresh_tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crm_core::UserRole;
    use std::sync::Arc;

    fn user(email: &str) -> User {
        User::new("Test".to_string(), email, "hash".to_string(), UserRole::User)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryStore::new();
        let created = store.insert(user("Alice@Example.com")).await.unwrap();

        assert_eq!(created.email, "alice@example.com");
        let by_id = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "alice@example.com");
        let by_email = store.find_by_email(" ALICE@example.com").await.unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(created.id));
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        store.insert(user("dup@example.com")).await.unwrap();

        let result = store.insert(user("DUP@example.com")).await;
        assert!(matches!(result, Err(RepositoryError::EmailAlreadyExists)));
    }

    #[tokio::test]
    async fn test_update_email_keeps_index_consistent() {
        let store = MemoryStore::new();
        let a = store.insert(user("a@example.com")).await.unwrap();
        store.insert(user("b@example.com")).await.unwrap();

        let clash = UserUpdate {
            email: Some("b@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.update(a.id, clash).await,
            Err(RepositoryError::EmailAlreadyExists)
        ));

        let rename = UserUpdate {
            email: Some("c@example.com".to_string()),
            ..Default::default()
        };
        store.update(a.id, rename).await.unwrap();
        assert!(store.find_by_email("a@example.com").await.unwrap().is_none());
        assert!(store.find_by_email("c@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let store = MemoryStore::new();
        let result = store.update(Uuid::new_v4(), UserUpdate::active(false)).await;
        assert!(matches!(result, Err(RepositoryError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_delete_user() {
        let store = MemoryStore::new();
        let u = store.insert(user("gone@example.com")).await.unwrap();

        assert!(store.delete(u.id).await.unwrap());
        assert!(!store.delete(u.id).await.unwrap());
        assert!(store.find_by_email("gone@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_lifecycle() {
        let store = MemoryStore::new();
        let u = store.insert(user("s@example.com")).await.unwrap();
        let later = Utc::now() + Duration::days(7);

        store.add_refresh_token(u.id, "t1", later).await.unwrap();
        store.add_refresh_token(u.id, "t2", later).await.unwrap();

        assert!(store.is_valid_refresh_token(u.id, "t1").await.unwrap());
        assert!(!store.is_valid_refresh_token(u.id, "t3").await.unwrap());
        assert!(!store.is_valid_refresh_token(Uuid::new_v4(), "t1").await.unwrap());

        assert!(store.remove_refresh_token(u.id, "t1").await.unwrap());
        assert!(!store.remove_refresh_token(u.id, "t1").await.unwrap());
        assert!(!store.is_valid_refresh_token(u.id, "t1").await.unwrap());
        assert!(store.is_valid_refresh_token(u.id, "t2").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_invalid() {
        let store = MemoryStore::new();
        let u = store.insert(user("e@example.com")).await.unwrap();

        store
            .add_refresh_token(u.id, "old", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        store
            .add_refresh_token(u.id, "new", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(!store.is_valid_refresh_token(u.id, "old").await.unwrap());
        assert_eq!(store.prune_expired_refresh_tokens(u.id).await.unwrap(), 1);
        assert_eq!(store.refresh_token_count(u.id).await, 1);
    }

    #[tokio::test]
    async fn test_clear_refresh_tokens_is_idempotent() {
        let store = MemoryStore::new();
        let u = store.insert(user("c@example.com")).await.unwrap();
        let later = Utc::now() + Duration::days(1);
        store.add_refresh_token(u.id, "a", later).await.unwrap();
        store.add_refresh_token(u.id, "b", later).await.unwrap();

        store.clear_refresh_tokens(u.id).await.unwrap();
        assert_eq!(store.refresh_token_count(u.id).await, 0);

        store.clear_refresh_tokens(u.id).await.unwrap();
        assert_eq!(store.refresh_token_count(u.id).await, 0);
    }

    #[tokio::test]
    async fn test_add_token_for_unknown_user() {
        let store = MemoryStore::new();
        let result = store
            .add_refresh_token(Uuid::new_v4(), "t", Utc::now() + Duration::days(1))
            .await;
        assert!(matches!(result, Err(RepositoryError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_concurrent_logout_and_refresh_check() {
        let store = Arc::new(MemoryStore::new());
        let u = store.insert(user("race@example.com")).await.unwrap();
        store
            .add_refresh_token(u.id, "shared", Utc::now() + Duration::days(1))
            .await
            .unwrap();

        let remover = {
            let store = store.clone();
            tokio::spawn(async move { store.remove_refresh_token(u.id, "shared").await })
        };
        let checker = {
            let store = store.clone();
            tokio::spawn(async move { store.is_valid_refresh_token(u.id, "shared").await })
        };

        assert!(remover.await.unwrap().unwrap());
        let _ = checker.await.unwrap().unwrap();

        // Once the removal has completed no later check can accept the token
        assert!(!store.is_valid_refresh_token(u.id, "shared").await.unwrap());
    }
}
