// src/db/sqlite.rs
use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use super::migrations::{Migration, HISTORY_TABLE};
use super::{
    reset_token_from_row, role_from_row, user_from_row, DatabaseBackend, DbError, ResetTokenRow,
    RoleRow, Transaction, UserRow, USER_COLUMNS,
};
use crate::models::{PasswordResetToken, Role, User};

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: Option<SqlitePool>,
}

impl SqliteBackend {
    pub fn new() -> Self {
        Self { pool: None }
    }

    // Helper to get the pool or return an error
    pub(crate) fn get_pool(&self) -> Result<&SqlitePool, DbError> {
        self.pool.as_ref().ok_or(DbError::InitError("Database not initialized".into()))
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(&mut self, path: &Path) -> Result<(), DbError> {
        // Create the database directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::InitError(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        log::info!("Opening SQLite database at: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        self.pool = Some(pool);
        Ok(())
    }

    async fn ensure_history_table(&self) -> Result<(), DbError> {
        let pool = self.get_pool()?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (migration_id TEXT PRIMARY KEY NOT NULL, applied_at TEXT NOT NULL)",
            HISTORY_TABLE
        ))
        .execute(pool)
        .await?;

        Ok(())
    }
}

impl Default for SqliteBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBackend for SqliteBackend {
    async fn init(&mut self, connection_string: &str) -> Result<(), DbError> {
        // the remainder is a plain file path, not a URL
        let db_path = connection_string
            .strip_prefix("sqlite:")
            .ok_or_else(|| DbError::ConfigError("Invalid SQLite connection string".into()))?;

        self.open(Path::new(db_path)).await
    }

    async fn has_migration_history(&self) -> Result<bool, DbError> {
        let pool = self.get_pool()?;

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(HISTORY_TABLE)
                .fetch_one(pool)
                .await?;

        Ok(count > 0)
    }

    async fn applied_migrations(&self) -> Result<Vec<String>, DbError> {
        if !self.has_migration_history().await? {
            return Ok(Vec::new());
        }
        let pool = self.get_pool()?;

        let ids: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT migration_id FROM {} ORDER BY migration_id",
            HISTORY_TABLE
        ))
        .fetch_all(pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), DbError> {
        self.ensure_history_table().await?;
        let pool = self.get_pool()?;

        let failed = |e: sqlx::Error| DbError::MigrationError {
            id: migration.id.to_string(),
            message: e.to_string(),
        };

        let mut tx = pool.begin().await?;

        for statement in migration.sqlite {
            sqlx::query(statement).execute(&mut *tx).await.map_err(failed)?;
        }

        sqlx::query(&format!(
            "INSERT INTO {} (migration_id, applied_at) VALUES (?, ?)",
            HISTORY_TABLE
        ))
        .bind(migration.id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(failed)?;

        tx.commit().await.map_err(failed)?;
        Ok(())
    }

    async fn find_user_by_name(&self, normalized_user_name: &str) -> Result<Option<User>, DbError> {
        let pool = self.get_pool()?;

        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE normalized_user_name = ?",
            USER_COLUMNS
        ))
        .bind(normalized_user_name)
        .fetch_optional(pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, normalized_email: &str) -> Result<Option<User>, DbError> {
        let pool = self.get_pool()?;

        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE normalized_email = ? LIMIT 1",
            USER_COLUMNS
        ))
        .bind(normalized_email)
        .fetch_optional(pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn create_user(&self, user: &User) -> Result<(), DbError> {
        let pool = self.get_pool()?;

        sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            USER_COLUMNS
        ))
        .bind(user.id.to_string())
        .bind(&user.user_name)
        .bind(&user.normalized_user_name)
        .bind(&user.email)
        .bind(&user.normalized_email)
        .bind(&user.password_hash)
        .bind(&user.security_stamp)
        .bind(user.created_at.to_rfc3339())
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn get_roles(&self) -> Result<Vec<Role>, DbError> {
        let pool = self.get_pool()?;

        let rows: Vec<RoleRow> =
            sqlx::query_as("SELECT id, name, normalized_name FROM roles ORDER BY name")
                .fetch_all(pool)
                .await?;

        rows.into_iter().map(role_from_row).collect()
    }

    async fn find_role(&self, normalized_name: &str) -> Result<Option<Role>, DbError> {
        let pool = self.get_pool()?;

        let row: Option<RoleRow> =
            sqlx::query_as("SELECT id, name, normalized_name FROM roles WHERE normalized_name = ?")
                .bind(normalized_name)
                .fetch_optional(pool)
                .await?;

        row.map(role_from_row).transpose()
    }

    async fn get_user_roles(&self, user_id: Uuid) -> Result<Vec<String>, DbError> {
        let pool = self.get_pool()?;

        let names: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.name
            FROM roles r
            JOIN user_roles ur ON r.id = ur.role_id
            WHERE ur.user_id = ?
            ORDER BY r.name
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn add_user_to_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), DbError> {
        let pool = self.get_pool()?;

        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id.to_string())
            .bind(role_id.to_string())
            .execute(pool)
            .await?;

        Ok(())
    }

    async fn store_reset_token(&self, token: &PasswordResetToken) -> Result<(), DbError> {
        let pool = self.get_pool()?;

        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (token_hash, user_id, security_stamp, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.user_id.to_string())
        .bind(&token.security_stamp)
        .bind(token.expires_at.to_rfc3339())
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn find_reset_token(&self, token_hash: &str) -> Result<Option<PasswordResetToken>, DbError> {
        let pool = self.get_pool()?;

        let row: Option<ResetTokenRow> = sqlx::query_as(
            r#"
            SELECT token_hash, user_id, security_stamp, expires_at
            FROM password_reset_tokens
            WHERE token_hash = ?
            "#,
        )
        .bind(token_hash)
        .fetch_optional(pool)
        .await?;

        row.map(reset_token_from_row).transpose()
    }

    async fn reset_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), DbError> {
        let pool = self.get_pool()?;
        let id_str = user_id.to_string();

        let mut tx = pool.begin().await?;

        let updated = sqlx::query("UPDATE users SET password_hash = ?, security_stamp = ? WHERE id = ?")
            .bind(password_hash)
            .bind(security_stamp)
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DbError::NotFound);
        }

        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Transaction, DbError> {
        let pool = self.get_pool()?;
        let tx = pool.begin().await?;
        Ok(Transaction::Sqlite(tx))
    }

    async fn commit_transaction(&self, tx: Transaction) -> Result<(), DbError> {
        match tx {
            Transaction::Sqlite(tx) => {
                tx.commit().await?;
                Ok(())
            }
            _ => Err(DbError::ConfigError("Invalid transaction type for SQLite".into())),
        }
    }

    async fn rollback_transaction(&self, tx: Transaction) -> Result<(), DbError> {
        match tx {
            Transaction::Sqlite(tx) => {
                tx.rollback().await?;
                Ok(())
            }
            _ => Err(DbError::ConfigError("Invalid transaction type for SQLite".into())),
        }
    }

    async fn add_role_in_transaction(&self, tx: &mut Transaction, role: &Role) -> Result<(), DbError> {
        let sqlite_tx = match tx {
            Transaction::Sqlite(tx) => tx,
            _ => return Err(DbError::ConfigError("Invalid transaction type for SQLite".into())),
        };

        sqlx::query("INSERT INTO roles (id, name, normalized_name) VALUES (?, ?, ?)")
            .bind(role.id.to_string())
            .bind(&role.name)
            .bind(&role.normalized_name)
            .execute(&mut **sqlite_tx)
            .await?;

        Ok(())
    }
}
