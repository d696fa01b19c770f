//! PostgreSQL-backed user and session store
//!
//! Users live in `users`; the refresh-token list is the `refresh_tokens`
//! table keyed by `user_id`. Every trait operation is one SQL statement, so
//! Postgres row-level atomicity serializes concurrent refresh and logout.

use super::models::{normalize_email, token_digest, User, UserUpdate};
use super::repository::{RepositoryError, SessionStore, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crm_core::UserRole;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_auth.sql");

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, permissions, is_active, last_login, created_at, updated_at";

/// Row shape of the `users` table
#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    permissions: Vec<String>,
    is_active: bool,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        let role = UserRole::parse(&record.role).ok_or_else(|| {
            RepositoryError::CorruptRecord(format!(
                "user {} has unknown role {}",
                record.id, record.role
            ))
        })?;

        Ok(User {
            id: record.id,
            name: record.name,
            email: record.email,
            password_hash: record.password_hash,
            role,
            permissions: record.permissions,
            is_active: record.is_active,
            last_login: record.last_login,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn map_db_error(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RepositoryError::EmailAlreadyExists;
        }
        if db.is_foreign_key_violation() {
            return RepositoryError::UserNotFound;
        }
    }
    RepositoryError::DatabaseError(e.to_string())
}

/// PostgreSQL store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Create the auth tables if they do not exist
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        record.map(User::try_from).transpose()
    }

    async fn insert(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users ({USER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(normalize_email(&user.email))
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.permissions)
        .bind(user.is_active)
        .bind(user.last_login)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        User::try_from(record)
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<User, RepositoryError> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET updated_at = now()");

        if let Some(name) = update.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(email) = update.email {
            query.push(", email = ").push_bind(normalize_email(&email));
        }
        if let Some(role) = update.role {
            query.push(", role = ").push_bind(role.as_str());
            query
                .push(", permissions = ")
                .push_bind(role.permission_strings());
        }
        if let Some(hash) = update.password_hash {
            query.push(", password_hash = ").push_bind(hash);
        }
        if let Some(active) = update.is_active {
            query.push(", is_active = ").push_bind(active);
        }
        if let Some(at) = update.last_login {
            query.push(", last_login = ").push_bind(at);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(format!(" RETURNING {USER_COLUMNS}"));

        let record = query
            .build_query_as::<UserRecord>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or(RepositoryError::UserNotFound)?;

        User::try_from(record)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        // refresh_tokens rows go with the user via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        records.into_iter().map(User::try_from).collect()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn add_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, issued_at, expires_at) VALUES ($1, $2, now(), $3)",
        )
        .bind(user_id)
        .bind(token_digest(token))
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn is_valid_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM refresh_tokens WHERE user_id = $1 AND token_hash = $2 AND expires_at > now())",
        )
        .bind(user_id)
        .bind(token_digest(token))
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn remove_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1 AND token_hash = $2")
                .bind(user_id)
                .bind(token_digest(token))
                .execute(&self.pool)
                .await
                .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_refresh_tokens(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn prune_expired_refresh_tokens(&self, user_id: Uuid) -> Result<usize, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1 AND expires_at <= now()")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(map_db_error)?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio::sync::OnceCell;

    static MIGRATED: OnceCell<()> = OnceCell::const_new();

    /// Store over `DATABASE_URL` with the schema applied, or `None` when unset
    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PgStore::connect(&url, 2).await.expect("connect to DATABASE_URL");
        MIGRATED
            .get_or_try_init(|| store.migrate())
            .await
            .expect("apply schema");
        Some(store)
    }

    fn user(tag: &str) -> User {
        let email = format!("{tag}-{}@example.com", Uuid::new_v4());
        User::new("Test".to_string(), &email, "hash".to_string(), UserRole::User)
    }

    async fn token_count(store: &PgStore, user_id: Uuid) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&store.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_insert_find_and_duplicate_email() {
        let Some(store) = test_store().await else {
            return;
        };
        let mut new_user = user("Alice");
        new_user.email = new_user.email.to_uppercase();
        let created = store.insert(new_user.clone()).await.unwrap();

        assert_eq!(created.email, new_user.email.to_lowercase());
        let by_email = store
            .find_by_email(&format!(" {} ", new_user.email))
            .await
            .unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(created.id));

        let mut clash = user("other");
        clash.email = created.email.clone();
        assert!(matches!(
            store.insert(clash).await,
            Err(RepositoryError::EmailAlreadyExists)
        ));

        store.delete(created.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_update_role_rederives_permissions() {
        let Some(store) = test_store().await else {
            return;
        };
        let created = store.insert(user("role")).await.unwrap();

        let updated = store
            .update(created.id, UserUpdate::role(UserRole::Support))
            .await
            .unwrap();
        assert_eq!(updated.role, UserRole::Support);
        assert_eq!(updated.permissions, UserRole::Support.permission_strings());

        assert!(matches!(
            store.update(Uuid::new_v4(), UserUpdate::active(false)).await,
            Err(RepositoryError::UserNotFound)
        ));

        assert!(store.delete(created.id).await.unwrap());
        assert!(!store.delete(created.id).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_refresh_token_lifecycle() {
        let Some(store) = test_store().await else {
            return;
        };
        let u = store.insert(user("session")).await.unwrap();
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

        store.delete(u.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_expired_refresh_token_is_invalid() {
        let Some(store) = test_store().await else {
            return;
        };
        let u = store.insert(user("expired")).await.unwrap();

        store
            .add_refresh_token(u.id, "old", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        store
            .add_refresh_token(u.id, "new", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(!store.is_valid_refresh_token(u.id, "old").await.unwrap());
        assert!(store.is_valid_refresh_token(u.id, "new").await.unwrap());
        assert_eq!(store.prune_expired_refresh_tokens(u.id).await.unwrap(), 1);
        assert_eq!(token_count(&store, u.id).await, 1);

        store.delete(u.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_clear_refresh_tokens_is_idempotent() {
        let Some(store) = test_store().await else {
            return;
        };
        let u = store.insert(user("clear")).await.unwrap();
        let later = Utc::now() + Duration::days(1);
        store.add_refresh_token(u.id, "a", later).await.unwrap();
        store.add_refresh_token(u.id, "b", later).await.unwrap();

        store.clear_refresh_tokens(u.id).await.unwrap();
        assert_eq!(token_count(&store, u.id).await, 0);

        store.clear_refresh_tokens(u.id).await.unwrap();
        assert_eq!(token_count(&store, u.id).await, 0);

        store.delete(u.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_add_token_for_unknown_user() {
        let Some(store) = test_store().await else {
            return;
        };
        let result = store
            .add_refresh_token(Uuid::new_v4(), "t", Utc::now() + Duration::days(1))
            .await;
        assert!(matches!(result, Err(RepositoryError::UserNotFound)));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_deleting_user_drops_their_tokens() {
        let Some(store) = test_store().await else {
            return;
        };
        let u = store.insert(user("cascade")).await.unwrap();
        store
            .add_refresh_token(u.id, "t", Utc::now() + Duration::days(1))
            .await
            .unwrap();

        assert!(store.delete(u.id).await.unwrap());
        assert_eq!(token_count(&store, u.id).await, 0);
    }

    #[test]
    fn test_schema_defines_both_tables() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS users"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS refresh_tokens"));
        assert!(SCHEMA.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_record_with_unknown_role_is_corrupt() {
        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::new_v4(),
            name: "X".to_string(),
            email: "x@example.com".to_string(),
            password_hash: "h".to_string(),
            role: "superuser".to_string(),
            permissions: vec![],
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        assert!(matches!(
            User::try_from(record),
            Err(RepositoryError::CorruptRecord(_))
        ));
    }
}
