// src/db/mod.rs
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::core::config::DatabaseSettings;
use crate::models::{PasswordResetToken, Role, User};

pub mod migrations;
pub mod mysql;
pub mod sqlite;

use migrations::Migration;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    SqlxError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Migration {id} failed: {message}")]
    MigrationError { id: String, message: String },
}

// Convert database-specific errors to our DbError
impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        DbError::SqlxError(error.to_string())
    }
}

// Backend-specific transaction handle
pub enum Transaction {
    MySql(sqlx::Transaction<'static, sqlx::MySql>),
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
}

/// Storage operations the identity tooling needs.
///
/// Implemented by each concrete backend and by [`Database`], which picks the
/// backend at runtime.
#[allow(async_fn_in_trait)]
pub trait DatabaseBackend: Send + Sync {
    // Open the connection pool
    async fn init(&mut self, connection_string: &str) -> Result<(), DbError>;

    // Schema migrations
    async fn has_migration_history(&self) -> Result<bool, DbError>;

    // Empty when the history table does not exist yet; never creates it
    async fn applied_migrations(&self) -> Result<Vec<String>, DbError>;

    async fn apply_migration(&self, migration: &Migration) -> Result<(), DbError>;

    // Users
    async fn find_user_by_name(&self, normalized_user_name: &str) -> Result<Option<User>, DbError>;

    async fn find_user_by_email(&self, normalized_email: &str) -> Result<Option<User>, DbError>;

    async fn create_user(&self, user: &User) -> Result<(), DbError>;

    // Roles
    async fn get_roles(&self) -> Result<Vec<Role>, DbError>;

    async fn find_role(&self, normalized_name: &str) -> Result<Option<Role>, DbError>;

    async fn get_user_roles(&self, user_id: Uuid) -> Result<Vec<String>, DbError>;

    async fn add_user_to_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), DbError>;

    // Password reset
    async fn store_reset_token(&self, token: &PasswordResetToken) -> Result<(), DbError>;

    async fn find_reset_token(&self, token_hash: &str) -> Result<Option<PasswordResetToken>, DbError>;

    // Replace the password hash and stamp, dropping every reset token of the user
    async fn reset_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), DbError>;

    // Transaction methods
    async fn begin_transaction(&self) -> Result<Transaction, DbError>;

    async fn commit_transaction(&self, tx: Transaction) -> Result<(), DbError>;

    async fn rollback_transaction(&self, tx: Transaction) -> Result<(), DbError>;

    async fn add_role_in_transaction(&self, tx: &mut Transaction, role: &Role) -> Result<(), DbError>;
}

// Enum to hold specific backend implementations
#[derive(Debug, Clone)]
pub enum DatabaseType {
    MySql(mysql::MySqlBackend),
    Sqlite(sqlite::SqliteBackend),
}

#[derive(Debug, Clone)]
pub struct Database {
    pub backend: DatabaseType,
}

impl Database {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DbError> {
        log::info!("Connecting to {}", settings.describe());

        let backend = match settings {
            DatabaseSettings::Sqlite { file } => {
                let mut backend = sqlite::SqliteBackend::new();
                backend.open(file).await?;
                DatabaseType::Sqlite(backend)
            }
            DatabaseSettings::MySql { .. } => {
                let mut backend = mysql::MySqlBackend::new();
                backend.init(&settings.connection_string()).await?;
                DatabaseType::MySql(backend)
            }
        };

        Ok(Self { backend })
    }

    pub fn get_backend_type(&self) -> &str {
        match &self.backend {
            DatabaseType::Sqlite(_) => "SQLite",
            DatabaseType::MySql(_) => "MySQL",
        }
    }
}

// Delegate every operation to the selected backend
impl DatabaseBackend for Database {
    async fn init(&mut self, connection_string: &str) -> Result<(), DbError> {
        match &mut self.backend {
            DatabaseType::MySql(backend) => backend.init(connection_string).await,
            DatabaseType::Sqlite(backend) => backend.init(connection_string).await,
        }
    }

    async fn has_migration_history(&self) -> Result<bool, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.has_migration_history().await,
            DatabaseType::Sqlite(backend) => backend.has_migration_history().await,
        }
    }

    async fn applied_migrations(&self) -> Result<Vec<String>, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.applied_migrations().await,
            DatabaseType::Sqlite(backend) => backend.applied_migrations().await,
        }
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.apply_migration(migration).await,
            DatabaseType::Sqlite(backend) => backend.apply_migration(migration).await,
        }
    }

    async fn find_user_by_name(&self, normalized_user_name: &str) -> Result<Option<User>, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.find_user_by_name(normalized_user_name).await,
            DatabaseType::Sqlite(backend) => backend.find_user_by_name(normalized_user_name).await,
        }
    }

    async fn find_user_by_email(&self, normalized_email: &str) -> Result<Option<User>, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.find_user_by_email(normalized_email).await,
            DatabaseType::Sqlite(backend) => backend.find_user_by_email(normalized_email).await,
        }
    }

    async fn create_user(&self, user: &User) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.create_user(user).await,
            DatabaseType::Sqlite(backend) => backend.create_user(user).await,
        }
    }

    async fn get_roles(&self) -> Result<Vec<Role>, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.get_roles().await,
            DatabaseType::Sqlite(backend) => backend.get_roles().await,
        }
    }

    async fn find_role(&self, normalized_name: &str) -> Result<Option<Role>, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.find_role(normalized_name).await,
            DatabaseType::Sqlite(backend) => backend.find_role(normalized_name).await,
        }
    }

    async fn get_user_roles(&self, user_id: Uuid) -> Result<Vec<String>, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.get_user_roles(user_id).await,
            DatabaseType::Sqlite(backend) => backend.get_user_roles(user_id).await,
        }
    }

    async fn add_user_to_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.add_user_to_role(user_id, role_id).await,
            DatabaseType::Sqlite(backend) => backend.add_user_to_role(user_id, role_id).await,
        }
    }

    async fn store_reset_token(&self, token: &PasswordResetToken) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.store_reset_token(token).await,
            DatabaseType::Sqlite(backend) => backend.store_reset_token(token).await,
        }
    }

    async fn find_reset_token(&self, token_hash: &str) -> Result<Option<PasswordResetToken>, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.find_reset_token(token_hash).await,
            DatabaseType::Sqlite(backend) => backend.find_reset_token(token_hash).await,
        }
    }

    async fn reset_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => {
                backend.reset_password(user_id, password_hash, security_stamp).await
            }
            DatabaseType::Sqlite(backend) => {
                backend.reset_password(user_id, password_hash, security_stamp).await
            }
        }
    }

    async fn begin_transaction(&self) -> Result<Transaction, DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.begin_transaction().await,
            DatabaseType::Sqlite(backend) => backend.begin_transaction().await,
        }
    }

    async fn commit_transaction(&self, tx: Transaction) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.commit_transaction(tx).await,
            DatabaseType::Sqlite(backend) => backend.commit_transaction(tx).await,
        }
    }

    async fn rollback_transaction(&self, tx: Transaction) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.rollback_transaction(tx).await,
            DatabaseType::Sqlite(backend) => backend.rollback_transaction(tx).await,
        }
    }

    async fn add_role_in_transaction(&self, tx: &mut Transaction, role: &Role) -> Result<(), DbError> {
        match &self.backend {
            DatabaseType::MySql(backend) => backend.add_role_in_transaction(tx, role).await,
            DatabaseType::Sqlite(backend) => backend.add_role_in_transaction(tx, role).await,
        }
    }
}

// Column lists shared by both backends; rows come back as plain strings
pub(crate) const USER_COLUMNS: &str = "id, user_name, normalized_user_name, email, normalized_email, \
     password_hash, security_stamp, created_at";

pub(crate) type UserRow = (String, String, String, String, String, String, String, String);

pub(crate) type RoleRow = (String, String, String);

pub(crate) type ResetTokenRow = (String, String, String, String);

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::InvalidData(format!("bad id '{}': {}", value, e)))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::InvalidData(format!("bad timestamp '{}': {}", value, e)))
}

pub(crate) fn user_from_row(row: UserRow) -> Result<User, DbError> {
    let (id, user_name, normalized_user_name, email, normalized_email, password_hash, security_stamp, created_at) =
        row;
    Ok(User {
        id: parse_uuid(&id)?,
        user_name,
        normalized_user_name,
        email,
        normalized_email,
        password_hash,
        security_stamp,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub(crate) fn role_from_row(row: RoleRow) -> Result<Role, DbError> {
    let (id, name, normalized_name) = row;
    Ok(Role {
        id: parse_uuid(&id)?,
        name,
        normalized_name,
    })
}

pub(crate) fn reset_token_from_row(row: ResetTokenRow) -> Result<PasswordResetToken, DbError> {
    let (token_hash, user_id, security_stamp, expires_at) = row;
    Ok(PasswordResetToken {
        token_hash,
        user_id: parse_uuid(&user_id)?,
        security_stamp,
        expires_at: parse_timestamp(&expires_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rows_with_bad_ids_are_rejected() {
        let row: RoleRow = ("not-a-uuid".into(), "User".into(), "USER".into());
        assert!(matches!(role_from_row(row), Err(DbError::InvalidData(_))));
    }

    #[test]
    fn timestamps_round_trip_through_rfc3339() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn connect_selects_sqlite_backend() {
        let dir = TempDir::new().unwrap();
        let settings = DatabaseSettings::Sqlite {
            file: dir.path().join("nested").join("identity.db"),
        };

        let db = Database::connect(&settings).await.unwrap();
        assert_eq!(db.get_backend_type(), "SQLite");
        assert!(db.applied_migrations().await.unwrap().is_empty());
        assert!(dir.path().join("nested").join("identity.db").exists());
    }

    #[tokio::test]
    async fn connect_keeps_percent_signs_in_file_names() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("q%20").join("x.db");
        let settings = DatabaseSettings::Sqlite { file: file.clone() };

        let db = Database::connect(&settings).await.unwrap();
        assert!(db.get_roles().await.is_err()); // no schema yet, but the file opened
        assert!(file.exists());
        assert!(!dir.path().join("q ").exists());
    }
}
